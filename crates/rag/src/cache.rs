use anyhow::{Context, Result};
use bytemuck::cast_slice;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use tabrag_core::now_iso_utc;
use tabrag_llm::EmbedMode;

use crate::provider::Embedder;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS embedding_cache (
        key TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        vector BLOB NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_embedding_cache_created ON embedding_cache(created_at);
"#;

/// Memoizes embeddings per `(model tag, text)`. Rows are write-once.
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingCache {
    pub fn open<P: AsRef<Path>>(path: P, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open embedding cache {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn, embedder)
    }

    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, embedder)
    }

    fn with_connection(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn model_tag(&self, mode: EmbedMode) -> String {
        match mode {
            EmbedMode::Document => self.embedder.model().to_string(),
            EmbedMode::Query => format!("{}:query", self.embedder.model()),
        }
    }

    /// Same length and order as `texts`. Each miss is persisted before the next
    /// text is embedded, so a provider failure keeps earlier results.
    pub fn embed_many(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let tag = self.model_tag(mode);
        let mut out = Vec::with_capacity(texts.len());
        let mut misses = 0usize;
        for text in texts {
            let key = cache_key(&tag, text);
            if let Some(vector) = self.lookup(&key)? {
                out.push(vector);
                continue;
            }
            misses += 1;
            let vector = self.embedder.embed(text, mode)?;
            self.store(&key, &tag, &vector)?;
            out.push(vector);
        }
        debug!(model = %tag, total = texts.len(), misses, "embedded texts through cache");
        Ok(out)
    }

    pub fn embed_one(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()], mode)?;
        Ok(vectors.pop().unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Deletes entries created before `cutoff`; returns how many were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Secs, true);
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM embedding_cache WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn lookup(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM embedding_cache WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = blob else {
            return Ok(None);
        };
        if blob.is_empty() || blob.len() % std::mem::size_of::<f32>() != 0 {
            warn!(key, bytes = blob.len(), "ignoring malformed cached embedding");
            return Ok(None);
        }
        Ok(Some(bytemuck::pod_collect_to_vec::<u8, f32>(&blob)))
    }

    fn store(&self, key: &str, tag: &str, vector: &[f32]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO embedding_cache (key, model, vector, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, tag, cast_slice::<f32, u8>(vector), now_iso_utc()],
        )?;
        Ok(())
    }
}

/// sha256 over `model_tag`, a 0x1F separator, then the text.
pub fn cache_key(model_tag: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_tag.as_bytes());
    hasher.update([0x1F]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl CountingEmbedder {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    impl Embedder for CountingEmbedder {
        fn model(&self) -> &str {
            "fake"
        }

        fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
            if Some(text) == self.fail_on {
                return Err(anyhow!("provider down"));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bias = if mode == EmbedMode::Query { 0.5 } else { 0.0 };
            Ok(vec![text.len() as f32 + bias, 1.0])
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hits_skip_the_provider_and_order_is_kept() {
        let embedder = Arc::new(CountingEmbedder::new(None));
        let cache = EmbeddingCache::in_memory(embedder.clone()).unwrap();
        let first = cache.embed_many(&strings(&["a", "bbb"]), EmbedMode::Document).unwrap();
        let second = cache
            .embed_many(&strings(&["bbb", "a", "cc"]), EmbedMode::Document)
            .unwrap();
        assert_eq!(first, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
        assert_eq!(second, vec![vec![3.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len().unwrap(), 3);
    }

    #[test]
    fn query_mode_uses_its_own_tag() {
        let embedder = Arc::new(CountingEmbedder::new(None));
        let cache = EmbeddingCache::in_memory(embedder.clone()).unwrap();
        let doc = cache.embed_one("abc", EmbedMode::Document).unwrap();
        let query = cache.embed_one("abc", EmbedMode::Query).unwrap();
        assert_ne!(doc, query);
        assert_eq!(cache.model_tag(EmbedMode::Query), "fake:query");
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn failure_keeps_earlier_work() {
        let embedder = Arc::new(CountingEmbedder::new(Some("boom")));
        let cache = EmbeddingCache::in_memory(embedder).unwrap();
        let err = cache.embed_many(&strings(&["ok1", "ok2", "boom", "never"]), EmbedMode::Document);
        assert!(err.is_err());
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn persisted_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/embeddings.sqlite");
        {
            let cache = EmbeddingCache::open(&path, Arc::new(CountingEmbedder::new(None))).unwrap();
            cache.embed_one("persist", EmbedMode::Document).unwrap();
        }
        let embedder = Arc::new(CountingEmbedder::new(None));
        let cache = EmbeddingCache::open(&path, embedder.clone()).unwrap();
        assert_eq!(cache.embed_one("persist", EmbedMode::Document).unwrap(), vec![7.0, 1.0]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prune_removes_old_rows_only() {
        let cache = EmbeddingCache::in_memory(Arc::new(CountingEmbedder::new(None))).unwrap();
        cache.embed_one("x", EmbedMode::Document).unwrap();
        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(cache.prune_older_than(past).unwrap(), 0);
        let future = Utc::now() + chrono::Duration::days(1);
        assert_eq!(cache.prune_older_than(future).unwrap(), 1);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn key_separates_model_and_text() {
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert_eq!(cache_key("m", "t").len(), 64);
    }
}
