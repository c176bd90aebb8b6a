use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::{post_json, GeminiConfig, OpenAiConfig};

/// Retrieval role of the text being embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedMode {
    Document,
    Query,
}

impl EmbedMode {
    pub fn gemini_task_type(&self) -> &'static str {
        match self {
            EmbedMode::Document => "RETRIEVAL_DOCUMENT",
            EmbedMode::Query => "RETRIEVAL_QUERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Gemini,
    OpenAi,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::Gemini => "gemini",
            EmbeddingProvider::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            EmbeddingProvider::Gemini => "text-embedding-004",
            EmbeddingProvider::OpenAi => "text-embedding-3-small",
        }
    }
}

#[derive(Clone)]
enum EmbedConfig {
    Gemini(GeminiConfig),
    OpenAi(OpenAiConfig),
}

/// One-text-per-request embedding client for hosted providers.
#[derive(Clone)]
pub struct RemoteEmbedder {
    http: Client,
    provider: EmbeddingProvider,
    model: String,
    config: EmbedConfig,
}

impl RemoteEmbedder {
    pub fn new(provider: EmbeddingProvider, model: impl Into<String>) -> Result<Self> {
        let config = match provider {
            EmbeddingProvider::Gemini => EmbedConfig::Gemini(GeminiConfig::from_env()?),
            EmbeddingProvider::OpenAi => EmbedConfig::OpenAi(OpenAiConfig::from_env()?),
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model: model.into(),
            config,
        })
    }

    pub fn provider(&self) -> EmbeddingProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        let vector = match &self.config {
            EmbedConfig::Gemini(cfg) => self.embed_gemini(cfg, text, mode).await?,
            EmbedConfig::OpenAi(cfg) => self.embed_openai(cfg, text).await?,
        };
        if vector.is_empty() {
            return Err(anyhow!("{} returned an empty embedding", self.provider.as_str()));
        }
        Ok(vector)
    }

    async fn embed_gemini(&self, cfg: &GeminiConfig, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        let model = self.model.trim_start_matches("models/");
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:embedContent?key={}",
            cfg.api_key
        );
        let payload = json!({
            "model": format!("models/{model}"),
            "content": { "parts": [ { "text": text } ] },
            "taskType": mode.gemini_task_type(),
        });
        let value = post_json("gemini", || self.http.post(&url).json(&payload)).await?;
        let parsed: GeminiEmbedResponse =
            serde_json::from_value(value).context("unexpected gemini embedding payload")?;
        Ok(parsed.embedding.values)
    }

    async fn embed_openai(&self, cfg: &OpenAiConfig, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", cfg.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "input": text,
        });
        let value = post_json("openai", || {
            self.http.post(&url).bearer_auth(&cfg.api_key).json(&payload)
        })
        .await?;
        let parsed: OpenAiEmbeddingResponse =
            serde_json::from_value(value).context("unexpected openai embedding payload")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("openai returned no embedding"))
    }
}

#[derive(Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiValues,
}

#[derive(Deserialize)]
struct GeminiValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_types_follow_mode() {
        assert_eq!(EmbedMode::Document.gemini_task_type(), "RETRIEVAL_DOCUMENT");
        assert_eq!(EmbedMode::Query.gemini_task_type(), "RETRIEVAL_QUERY");
    }

    #[test]
    fn gemini_payload_shape_parses() {
        let parsed: GeminiEmbedResponse =
            serde_json::from_str(r#"{"embedding": {"values": [0.1, 0.2]}}"#).unwrap();
        assert_eq!(parsed.embedding.values.len(), 2);
    }

    #[test]
    fn default_models() {
        assert_eq!(EmbeddingProvider::Gemini.default_model(), "text-embedding-004");
        assert_eq!(EmbeddingProvider::OpenAi.as_str(), "openai");
    }
}
