use async_openai::{config::OpenAIConfig, Client};

use super::config::AppConfig;

pub type LlmClient = Client<OpenAIConfig>;

fn client_for(api_key: &str, api_base: &str) -> LlmClient {
    Client::with_config(
        OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base.trim_end_matches('/')),
    )
}

/// Client for the answering model (Gemini's OpenAI-compatible endpoint by default).
pub fn build_chat_client(config: &AppConfig) -> LlmClient {
    client_for(&config.openai_api_key, &config.openai_base_url)
}

/// Client for the page OCR vision model.
pub fn build_vision_client(config: &AppConfig) -> LlmClient {
    client_for(&config.ocr_api_key, &config.ocr_base_url)
}

pub fn build_embedding_client(config: &AppConfig) -> LlmClient {
    client_for(&config.embedding_api_key, &config.embedding_base_url)
}
