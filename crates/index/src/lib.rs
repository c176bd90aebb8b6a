use serde_json::{Map, Value};
use uuid::Uuid;

mod error;
mod filter;
mod memory;
mod qdrant;

pub use error::{IndexError, Result};
pub use filter::{Condition, Filter};
pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Filterable nearest-neighbour store. Upserting an existing id replaces it.
pub trait VectorIndex: Send + Sync {
    fn collection_exists(&self, name: &str) -> Result<bool>;
    fn create_collection(&self, name: &str, dims: usize) -> Result<()>;
    fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()>;
    fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;
    /// Exact point count.
    fn count(&self, name: &str) -> Result<u64>;
    /// Returns whether the collection existed.
    fn drop_collection(&self, name: &str) -> Result<bool>;
}

/// Deterministic point id for a tenant's chunk.
pub fn point_id(bot_id: &str, chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{bot_id}:{chunk_id}").as_bytes())
}
