use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::runtime::Runtime;

use tabrag_core::{HashEmbedder, HashEmbedderConfig};
use tabrag_llm::{EmbedMode, LlmClient, LlmRequest, RemoteEmbedder};

use crate::settings::{EmbeddingKind, Settings};

/// Text to vector. Implementations must be deterministic per `(model, text, mode)`
/// for the cache to be sound.
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>>;
}

/// Prompt to answer text.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String>;
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Remote(RemoteEmbedder, Arc<Runtime>),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    model: String,
}

impl EmbeddingClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.embedding {
            EmbeddingKind::Hash => Ok(Self::hash(settings.hash_dimensions)),
            EmbeddingKind::Remote(provider) => {
                let remote = RemoteEmbedder::new(provider, settings.embedding_model.clone())?;
                let runtime = Runtime::new().context("failed to create tokio runtime")?;
                Ok(Self {
                    model: remote.model().to_string(),
                    backend: EmbeddingBackend::Remote(remote, Arc::new(runtime)),
                })
            }
        }
    }

    pub fn hash(dimensions: usize) -> Self {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions,
            ..HashEmbedderConfig::default()
        });
        Self {
            model: embedder.model_name(),
            backend: EmbeddingBackend::Hash(embedder),
        }
    }
}

impl Embedder for EmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(embedder.embed_text(text)),
            EmbeddingBackend::Remote(remote, runtime) => runtime
                .block_on(remote.embed(text, mode))
                .with_context(|| format!("embedding with {} failed", remote.model())),
        }
    }
}

impl Generator for LlmClient {
    fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let request = LlmRequest {
            system: system.map(str::to_string),
            user: prompt.to_string(),
        };
        self.chat_blocking(&request)
            .with_context(|| format!("{} generation failed", self.provider().as_str()))
    }
}
