use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use tabrag_index::{MemoryIndex, QdrantIndex, VectorIndex};
use tabrag_llm::LlmClient;

use crate::cache::EmbeddingCache;
use crate::catalog::CatalogStore;
use crate::context::ContextStore;
use crate::ingest::IngestPipeline;
use crate::profiles::BotProfiles;
use crate::provider::{Embedder, EmbeddingClient, Generator};
use crate::rerank;
use crate::retriever::Retriever;
use crate::settings::{IndexKind, Settings};
use crate::turn::{TurnOptions, TurnOrchestrator};

/// Everything a process needs, wired from one `Settings`.
pub struct App {
    pub settings: Settings,
    pub catalog: Arc<CatalogStore>,
    pub contexts: Arc<ContextStore>,
    pub cache: Arc<EmbeddingCache>,
    pub index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn Generator>,
}

impl App {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let index: Arc<dyn VectorIndex> = match settings.vector_index {
            IndexKind::Memory => Arc::new(MemoryIndex::new()),
            IndexKind::Qdrant => Arc::new(
                QdrantIndex::new(
                    &settings.qdrant_url,
                    settings.qdrant_api_key.as_deref(),
                    settings.qdrant_timeout,
                )
                .context("failed to build qdrant client")?,
            ),
        };
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::from_settings(&settings)?);
        let generator: Arc<dyn Generator> = Arc::new(LlmClient::new(
            settings.llm_provider,
            settings.llm_model.clone(),
        )?);
        Self::with_parts(settings, index, embedder, generator)
    }

    /// Opens the sqlite stores named by `settings` around caller-supplied seams.
    pub fn with_parts(
        settings: Settings,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let catalog = Arc::new(CatalogStore::open(&settings.catalog_db_path)?);
        let contexts = Arc::new(ContextStore::open(&settings.conv_db_path)?);
        let cache = Arc::new(EmbeddingCache::open(&settings.embed_cache_path, embedder)?);
        info!(
            model = %cache.embedder().model(),
            collection = %settings.collection,
            index = ?settings.vector_index,
            "stores opened"
        );
        Ok(Self {
            settings,
            catalog,
            contexts,
            cache,
            index,
            generator,
        })
    }

    pub fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(
            self.settings.data_dir.clone(),
            self.catalog.clone(),
            self.cache.clone(),
            self.index.clone(),
            self.settings.collection.clone(),
        )
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(self.index.clone(), self.cache.clone(), self.settings.collection.clone())
    }

    pub fn profiles(&self) -> BotProfiles {
        BotProfiles::load(&self.settings.bot_profiles_path)
    }

    pub fn orchestrator(&self) -> TurnOrchestrator {
        TurnOrchestrator::new(
            self.profiles(),
            self.catalog.clone(),
            self.contexts.clone(),
            self.retriever(),
            rerank::from_flag(self.settings.enable_reranker),
            self.generator.clone(),
            TurnOptions::from(&self.settings),
        )
    }
}
