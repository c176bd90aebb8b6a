pub mod app;
pub mod cache;
pub mod catalog;
pub mod context;
pub mod ingest;
pub mod profiles;
pub mod prompts;
pub mod provider;
pub mod rerank;
pub mod retriever;
pub mod settings;
pub mod turn;

pub use app::App;
pub use cache::{cache_key, EmbeddingCache};
pub use catalog::{partial_ratio, CatalogEntry, CatalogMatch, CatalogStore};
pub use context::{ContextStore, Conversation, Role, Slots, Turn, HISTORY_LIMIT};
pub use ingest::{HealthReport, IngestPipeline, IngestReport, PreviewReport, ResetReport, UPSERT_BATCH};
pub use profiles::{BotProfile, BotProfiles, Contact, DEFAULT_BOT_ID};
pub use prompts::{build_prompt, SYSTEM_QA};
pub use provider::{Embedder, EmbeddingBackend, EmbeddingClient, Generator};
pub use rerank::{OverlapReranker, PassthroughReranker, Reranker};
pub use retriever::{wants_money, Hit, QueryMeta, Retriever, MONETARY_KEYWORDS};
pub use settings::{EmbeddingKind, IndexKind, Settings};
pub use tabrag_llm::{EmbedMode, LlmClient, LlmProvider, LlmRequest};
pub use turn::{ChatRequest, ChatResponse, RetrievalDebug, Source, TurnOptions, TurnOrchestrator};
