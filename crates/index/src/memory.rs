use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::filter::Filter;
use crate::{Point, ScoredPoint, VectorIndex};

struct Collection {
    dims: usize,
    points: IndexMap<String, Point>,
}

/// In-process index with exact cosine scoring. Ties keep insertion order.
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for MemoryIndex {
    fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                dims,
                points: IndexMap::new(),
            });
        Ok(())
    }

    fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| IndexError::MissingCollection(name.to_string()))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != collection.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dims,
                got: bad.vector.len(),
            });
        }
        for point in points {
            collection.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| IndexError::MissingCollection(name.to_string()))?;
        if vector.len() != collection.dims {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dims,
                got: vector.len(),
            });
        }
        let mut hits: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn count(&self, name: &str) -> Result<u64> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| IndexError::MissingCollection(name.to_string()))?;
        Ok(collection.points.len() as u64)
    }

    fn drop_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.write().remove(name).is_some())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
