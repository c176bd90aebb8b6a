use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use tabrag_core::{keys, Domain, GENERAL};
use tabrag_index::{Filter, ScoredPoint, VectorIndex};
use tabrag_llm::EmbedMode;

use crate::cache::EmbeddingCache;

pub const MONETARY_KEYWORDS: &[&str] = &[
    "matric", "arancel", "cuota", "mensual", "$", "pago", "plan", "inscrip", "valor", "precio",
    "costo", "coste", "importe",
];

/// True when the lowercased query mentions money.
pub fn wants_money(query: &str) -> bool {
    let lower = query.to_lowercase();
    MONETARY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Optional filter context for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMeta {
    #[serde(rename = "carrera_id", default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(rename = "carrera", default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(rename = "facultad", default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(rename = "modalidad", default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(rename = "periodo", default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl QueryMeta {
    pub fn program_id(&self) -> Option<&str> {
        present(&self.program_id)
    }

    pub fn program(&self) -> Option<&str> {
        present(&self.program)
    }

    pub fn faculty(&self) -> Option<&str> {
        present(&self.faculty)
    }

    pub fn modality(&self) -> Option<&str> {
        present(&self.modality)
    }

    pub fn period(&self) -> Option<&str> {
        present(&self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub text: String,
    pub metadata: Map<String, Value>,
    pub score: f32,
}

impl Hit {
    fn from_point(point: ScoredPoint) -> Self {
        let text = point
            .payload
            .get(keys::TEXT)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            text,
            metadata: point.payload,
            score: point.score,
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn chunk_id(&self) -> Option<&str> {
        self.field(keys::CHUNK_ID)
    }

    pub fn domain(&self) -> Option<&str> {
        self.field(keys::DOMAIN)
    }

    fn dedup_key(&self) -> Option<&str> {
        self.chunk_id()
            .filter(|id| !id.is_empty())
            .or_else(|| self.field(keys::POINT_UUID))
    }
}

/// Which clauses a pass keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Strict,
    Relaxed(Domain),
}

fn build_filter(meta: &QueryMeta, bot_id: &str, allowed: &[Domain], pass: Pass) -> Filter {
    let mut filter = Filter::new().equals(keys::BOT_ID, bot_id);
    if !allowed.is_empty() {
        filter = filter.any_of(keys::DOMAIN, allowed.iter().map(|d| d.as_str()));
    }
    if let Pass::Relaxed(domain) = pass {
        filter = filter.equals(keys::DOMAIN, domain.as_str());
    }
    if let Some(program_id) = meta.program_id() {
        filter = filter.equals(keys::PROGRAM_ID, program_id);
    }
    if let Some(program) = meta.program().filter(|p| !p.eq_ignore_ascii_case(GENERAL)) {
        filter = filter.equals(keys::PROGRAM, program);
    }
    if pass == Pass::Strict {
        if let Some(faculty) = meta.faculty() {
            filter = filter.equals(keys::FACULTY, faculty);
        }
        if let Some(modality) = meta.modality() {
            filter = filter.equals(keys::MODALITY, modality);
        }
        if let Some(period) = meta.period() {
            filter = filter.equals(keys::PERIOD, period);
        }
    }
    filter
}

/// Filtered vector search with a per-domain coverage guarantee.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    cache: Arc<EmbeddingCache>,
    collection: String,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, cache: Arc<EmbeddingCache>, collection: impl Into<String>) -> Self {
        Self {
            index,
            cache,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn search(
        &self,
        query: &str,
        meta: &QueryMeta,
        top_k: usize,
        bot_id: &str,
        allowed: &[Domain],
        ensure: &[Domain],
    ) -> Result<Vec<Hit>> {
        let vector = self.cache.embed_one(query, EmbedMode::Query)?;

        let strict = self.run(&vector, &build_filter(meta, bot_id, allowed, Pass::Strict), top_k)?;

        let mut ensure: Vec<Domain> = ensure.to_vec();
        if wants_money(query) && !ensure.contains(&Domain::Aranceles) {
            ensure.insert(0, Domain::Aranceles);
        }

        let mut relaxed = Vec::new();
        for domain in ensure {
            if strict.iter().any(|hit| hit.domain() == Some(domain.as_str())) {
                continue;
            }
            let limit = (top_k / 2).max(3);
            let filter = build_filter(meta, bot_id, allowed, Pass::Relaxed(domain));
            let found = self.run(&vector, &filter, limit)?;
            info!(bot_id, domain = %domain, found = found.len(), "relaxed pass for missing domain");
            relaxed.extend(found);
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(strict.len() + relaxed.len());
        for hit in strict.into_iter().chain(relaxed) {
            if let Some(key) = hit.dedup_key() {
                if !seen.insert(key.to_string()) {
                    continue;
                }
            }
            merged.push(hit);
        }
        merged.truncate(top_k);
        debug!(bot_id, hits = merged.len(), "retrieval finished");
        Ok(merged)
    }

    fn run(&self, vector: &[f32], filter: &Filter, limit: usize) -> Result<Vec<Hit>> {
        let points = self
            .index
            .search(&self.collection, vector, filter, limit)
            .with_context(|| format!("search in {} failed", self.collection))?;
        Ok(points.into_iter().map(Hit::from_point).collect())
    }
}
