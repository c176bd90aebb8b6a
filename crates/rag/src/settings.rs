use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tabrag_llm::{EmbeddingProvider, LlmProvider};

pub const DEFAULT_TOP_K: usize = 30;
pub const DEFAULT_RERANK_K: usize = 5;
pub const DEFAULT_RESOLVE_THRESHOLD: u8 = 82;
pub const DEFAULT_COLLECTION: &str = "admisiones";
pub const DEFAULT_HASH_DIMENSIONS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Hash,
    Remote(EmbeddingProvider),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub catalog_db_path: PathBuf,
    pub conv_db_path: PathBuf,
    pub embed_cache_path: PathBuf,
    pub bot_profiles_path: PathBuf,
    pub vector_index: IndexKind,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub qdrant_timeout: Duration,
    pub collection: String,
    pub embedding: EmbeddingKind,
    pub embedding_model: String,
    pub hash_dimensions: usize,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub top_k: usize,
    pub rerank_k: usize,
    pub enable_reranker: bool,
    pub resolve_threshold: u8,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: usize| -> Result<usize> {
            match get(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| anyhow!(format!("{key} must be a non-negative integer, got {raw:?}"))),
                None => Ok(default),
            }
        };

        let data_dir = PathBuf::from(get("TABRAG_DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let state_dir = PathBuf::from(get("TABRAG_STATE_DIR").unwrap_or_else(|| "state".to_string()));
        let state_path = |key: &str, file: &str| {
            get(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join(file))
        };
        let catalog_db_path = state_path("CATALOG_DB_PATH", "catalog.db");
        let conv_db_path = state_path("CONV_DB_PATH", "conversations.db");
        let embed_cache_path = state_path("EMBED_CACHE_PATH", "embeddings.sqlite");
        let bot_profiles_path = get("BOT_PROFILES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config/bot_profiles.yaml"));

        let vector_index = match get("VECTOR_INDEX").unwrap_or_else(|| "memory".into()).to_lowercase().as_str() {
            "memory" => IndexKind::Memory,
            "qdrant" => IndexKind::Qdrant,
            other => return Err(anyhow!(format!("unknown vector index {other}"))),
        };

        let embedding = match get("EMBEDDING_PROVIDER").unwrap_or_else(|| "hash".into()).to_lowercase().as_str() {
            "hash" => EmbeddingKind::Hash,
            "gemini" => EmbeddingKind::Remote(EmbeddingProvider::Gemini),
            "openai" => EmbeddingKind::Remote(EmbeddingProvider::OpenAi),
            other => return Err(anyhow!(format!("unknown embedding provider {other}"))),
        };
        let embedding_model = get("EMBEDDING_MODEL").unwrap_or_else(|| match embedding {
            EmbeddingKind::Hash => "hash".to_string(),
            EmbeddingKind::Remote(provider) => provider.default_model().to_string(),
        });

        let provider_name = get("LLM_PROVIDER").unwrap_or_else(|| "local".to_string());
        let llm_provider = LlmProvider::from_str(&provider_name)
            .ok_or_else(|| anyhow!(format!("unknown provider {provider_name}")))?;
        let llm_model = get("LLM_MODEL").unwrap_or_else(|| default_model(llm_provider).to_string());

        let resolve_threshold = number("RESOLVE_THRESHOLD", DEFAULT_RESOLVE_THRESHOLD as usize)?;
        if resolve_threshold > 100 {
            return Err(anyhow!("RESOLVE_THRESHOLD must be between 0 and 100"));
        }

        Ok(Self {
            data_dir,
            catalog_db_path,
            conv_db_path,
            embed_cache_path,
            bot_profiles_path,
            vector_index,
            qdrant_url: get("QDRANT_URL").unwrap_or_else(|| "http://localhost:6333".to_string()),
            qdrant_api_key: get("QDRANT_API_KEY"),
            qdrant_timeout: Duration::from_secs(number("QDRANT_TIMEOUT", 5)? as u64),
            collection: get("QDRANT_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            embedding,
            embedding_model,
            hash_dimensions: number("HASH_EMBED_DIMENSIONS", DEFAULT_HASH_DIMENSIONS)?.max(1),
            llm_provider,
            llm_model,
            top_k: number("RAG_TOP_K", DEFAULT_TOP_K)?.max(1),
            rerank_k: number("RAG_RERANK_K", DEFAULT_RERANK_K)?.max(1),
            enable_reranker: get("ENABLE_RERANKER").map(|v| parse_bool(&v)).unwrap_or(true),
            resolve_threshold: resolve_threshold as u8,
            state_dir,
        })
    }

    pub fn bot_data_dir(&self, bot_id: &str) -> PathBuf {
        self.data_dir.join(bot_id)
    }
}

fn default_model(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "gpt-4.1-mini",
        LlmProvider::Gemini => "gemini-1.5-pro",
        LlmProvider::Local => "local",
    }
}

pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
