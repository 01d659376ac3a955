use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::{config::AppConfig, llm::build_embedding_client};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Any OpenAI-compatible `/embeddings` endpoint, Ollama included.
    #[default]
    #[serde(alias = "ollama")]
    OpenAI,
    #[serde(alias = "fast-embed", alias = "fast")]
    FastEmbed,
    Hashed,
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimension: usize,
    },
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => Ok(Self::new_openai(
                Arc::new(build_embedding_client(config)),
                config.embedding_model.clone(),
                config.embedding_dimensions as usize,
            )),
            EmbeddingBackend::FastEmbed => {
                Self::new_fastembed(Some(config.embedding_model.clone())).await
            }
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension }
            | EmbeddingInner::FastEmbed { dimension, .. }
            | EmbeddingInner::OpenAI { dimension, .. } => *dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(vec![text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding backend returned no vector for input"))
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect()),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                guard
                    .embed(texts, None)
                    .context("generating fastembed batch embeddings")
            }
            EmbeddingInner::OpenAI { client, model, .. } => {
                let expected = texts.len();
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let mut data = response.data;
                data.sort_by_key(|item| item.index);
                let embeddings: Vec<Vec<f32>> =
                    data.into_iter().map(|item| item.embedding).collect();

                if embeddings.len() != expected {
                    return Err(anyhow!(
                        "embedding endpoint returned {} vectors for {expected} inputs",
                        embeddings.len()
                    ));
                }

                debug!(
                    count = embeddings.len(),
                    dimension = embeddings.first().map_or(0, Vec::len),
                    "received embeddings"
                );

                Ok(embeddings)
            }
        }
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimension,
            },
        }
    }

    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model_name = if let Some(code) = model_override {
            EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?
        } else {
            EmbeddingModel::default()
        };

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model_name_code = model_name.to_string();

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }
}

// Bag-of-tokens vectors; deterministic, so tests and offline runs need no model.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    let mut token_count = 0usize;
    for token in tokens(text) {
        token_count += 1;
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    if token_count == 0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_deserializes_aliases() {
        let parse = |raw: &str| serde_json::from_str::<EmbeddingBackend>(&format!("\"{raw}\""));
        assert_eq!(parse("ollama").expect("parse"), EmbeddingBackend::OpenAI);
        assert_eq!(parse("fast").expect("parse"), EmbeddingBackend::FastEmbed);
        assert_eq!(parse("hashed").expect("parse"), EmbeddingBackend::Hashed);
        assert!(parse("chroma").is_err());
    }

    #[tokio::test]
    async fn hashed_embeddings_are_normalised_and_stable() {
        let provider = EmbeddingProvider::new_hashed(64).expect("provider");
        let first = provider.embed("Python lists are mutable").await.expect("embed");
        let second = provider.embed("python LISTS are mutable").await.expect("embed");

        assert_eq!(first.len(), 64);
        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashed_batch_keeps_input_order() {
        let provider = EmbeddingProvider::new_hashed(32).expect("provider");
        let batch = provider
            .embed_batch(vec!["tuples".into(), "dictionaries".into()])
            .await
            .expect("batch");
        let single = provider.embed("dictionaries").await.expect("embed");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(1), Some(&single));
        assert!(provider.embed_batch(Vec::new()).await.expect("empty").is_empty());
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector() {
        let provider = EmbeddingProvider::new_hashed(8).expect("provider");
        let vector = provider.embed("  ").await.expect("embed");
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
