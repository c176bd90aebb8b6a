use anyhow::Result;
use std::collections::HashSet;

use tabrag_core::fold;

use crate::retriever::Hit;

/// Reorders retrieved hits and keeps the best `top_k`.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    fn rerank(&self, query: &str, hits: Vec<Hit>, top_k: usize) -> Result<Vec<Hit>>;
}

/// Keeps retrieval order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughReranker;

impl Reranker for PassthroughReranker {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn rerank(&self, _query: &str, mut hits: Vec<Hit>, top_k: usize) -> Result<Vec<Hit>> {
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Orders hits by the share of query terms found in their text, then by
/// retrieval order.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlapReranker;

fn terms(text: &str) -> HashSet<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

impl Reranker for OverlapReranker {
    fn name(&self) -> &str {
        "overlap"
    }

    fn rerank(&self, query: &str, hits: Vec<Hit>, top_k: usize) -> Result<Vec<Hit>> {
        let wanted = terms(query);
        if wanted.is_empty() {
            return PassthroughReranker.rerank(query, hits, top_k);
        }
        let mut scored: Vec<(usize, Hit)> = hits
            .into_iter()
            .map(|hit| {
                let found = terms(&hit.text);
                (wanted.intersection(&found).count(), hit)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, hit)| hit).collect())
    }
}

pub fn from_flag(enabled: bool) -> Box<dyn Reranker> {
    if enabled {
        Box::new(OverlapReranker)
    } else {
        Box::new(PassthroughReranker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn hit(text: &str) -> Hit {
        Hit {
            text: text.to_string(),
            metadata: Map::new(),
            score: 0.0,
        }
    }

    fn texts(hits: &[Hit]) -> Vec<&str> {
        hits.iter().map(|h| h.text.as_str()).collect()
    }

    #[test]
    fn passthrough_truncates_in_order() {
        let hits = vec![hit("a"), hit("b"), hit("c")];
        let out = PassthroughReranker.rerank("q", hits, 2).unwrap();
        assert_eq!(texts(&out), ["a", "b"]);
    }

    #[test]
    fn overlap_prefers_matching_terms_and_is_stable() {
        let hits = vec![
            hit("Becas deportivas"),
            hit("Arancel mensual Medicina 2024"),
            hit("Becas culturales"),
            hit("Medicina: duración 6 años"),
        ];
        let out = OverlapReranker
            .rerank("arancel de medicina", hits, 3)
            .unwrap();
        assert_eq!(
            texts(&out),
            ["Arancel mensual Medicina 2024", "Medicina: duración 6 años", "Becas deportivas"]
        );
    }

    #[test]
    fn flag_selects_implementation() {
        assert_eq!(from_flag(true).name(), "overlap");
        assert_eq!(from_flag(false).name(), "passthrough");
    }
}
