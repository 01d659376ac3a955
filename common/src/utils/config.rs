use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Directory of the embedded vector store. A value that already carries a
    /// scheme (`mem://`, `ws://...`) is used verbatim as the SurrealDB address.
    pub store_path: String,
    pub collection_name: String,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_local_base_url")]
    pub embedding_base_url: String,
    #[serde(default = "default_local_api_key")]
    pub embedding_api_key: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_local_base_url")]
    pub ocr_base_url: String,
    #[serde(default = "default_local_api_key")]
    pub ocr_api_key: String,
    #[serde(default = "default_ocr_model")]
    pub ocr_model: String,
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_history_max_pairs")]
    pub history_max_pairs: usize,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_unit_top_k")]
    pub unit_top_k: usize,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_namespace() -> String {
    "course_rag".to_string()
}

fn default_local_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_local_api_key() -> String {
    "ollama".to_string()
}

fn default_embedding_model() -> String {
    "mxbai-embed-large".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1024
}

fn default_ocr_model() -> String {
    "deepseek-ocr".to_string()
}

fn default_documents_dir() -> String {
    "./data".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_history_max_pairs() -> usize {
    3
}

fn default_retrieval_top_k() -> usize {
    5
}

fn default_unit_top_k() -> usize {
    20
}

impl AppConfig {
    /// SurrealDB connection string for the configured store.
    pub fn store_address(&self) -> String {
        if self.store_path.contains("://") {
            self.store_path.clone()
        } else {
            format!("surrealkv://{}", self.store_path)
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            store_path: String::new(),
            collection_name: String::new(),
            surrealdb_namespace: default_namespace(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_base_url: default_local_base_url(),
            embedding_api_key: default_local_api_key(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            ocr_base_url: default_local_base_url(),
            ocr_api_key: default_local_api_key(),
            ocr_model: default_ocr_model(),
            documents_dir: default_documents_dir(),
            http_port: default_http_port(),
            history_max_pairs: default_history_max_pairs(),
            retrieval_top_k: default_retrieval_top_k(),
            unit_top_k: default_unit_top_k(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_keys_fail_deserialization() {
        let config = Config::builder()
            .set_override("store_path", "./vectors")
            .expect("override")
            .build()
            .expect("build config");

        let result = config.try_deserialize::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let config = Config::builder()
            .set_override("openai_api_key", "key")
            .expect("override")
            .set_override("store_path", "./vectors")
            .expect("override")
            .set_override("collection_name", "python")
            .expect("override")
            .build()
            .expect("build config");

        let app_config: AppConfig = config.try_deserialize().expect("deserialize");
        assert_eq!(app_config.chat_model, "gemini-2.5-flash");
        assert_eq!(app_config.embedding_model, "mxbai-embed-large");
        assert_eq!(app_config.embedding_backend, EmbeddingBackend::OpenAI);
        assert_eq!(app_config.history_max_pairs, 3);
        assert_eq!(app_config.retrieval_top_k, 5);
        assert_eq!(app_config.unit_top_k, 20);
        assert_eq!(app_config.http_port, 8000);
    }

    #[test]
    fn store_address_adds_scheme_only_for_plain_paths() {
        let mut config = AppConfig {
            store_path: "./chroma/python".into(),
            ..Default::default()
        };
        assert_eq!(config.store_address(), "surrealkv://./chroma/python");

        config.store_path = "mem://".into();
        assert_eq!(config.store_address(), "mem://");
    }
}
