use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tabrag_core::{keys, list_data_files, Domain, Normalizer, Record};
use tabrag_index::{point_id, Point, VectorIndex};
use tabrag_llm::EmbedMode;

use crate::cache::EmbeddingCache;
use crate::catalog::CatalogStore;

pub const UPSERT_BATCH: usize = 128;
const DIM_PROBE: &str = "dim_check";

#[derive(Debug, Clone, Serialize)]
pub struct PreviewReport {
    pub bot_id: String,
    pub files: Vec<String>,
    pub counts_by_domain: IndexMap<String, usize>,
    pub sample: Vec<Record>,
    pub total_records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub bot_id: String,
    pub files: Vec<String>,
    pub found_rows: usize,
    pub catalog_entries: usize,
    pub collection: String,
    pub count_now: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub collection: String,
    pub dropped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    pub catalog_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub embedding_model: String,
    pub dims: usize,
    pub collection: String,
    pub collection_exists: bool,
}

/// Source directory to index: normalize, catalog, embed, upsert.
pub struct IngestPipeline {
    data_root: PathBuf,
    catalog: Arc<CatalogStore>,
    cache: Arc<EmbeddingCache>,
    index: Arc<dyn VectorIndex>,
    collection: String,
}

impl IngestPipeline {
    pub fn new(
        data_root: impl Into<PathBuf>,
        catalog: Arc<CatalogStore>,
        cache: Arc<EmbeddingCache>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            catalog,
            cache,
            index,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn bot_dir(&self, bot_id: &str) -> PathBuf {
        self.data_root.join(bot_id)
    }

    /// Dry run over `<data_root>/<bot>`, or the data root itself when the tenant
    /// has no directory of its own.
    pub fn preview(&self, bot_id: &str, only_domain: Option<Domain>, sample_size: usize) -> Result<PreviewReport> {
        let mut dir = self.bot_dir(bot_id);
        if !dir.is_dir() {
            dir = self.data_root.clone();
        }
        let files = file_names(&dir)?;
        let records = Normalizer::new(bot_id).normalize(&dir)?;

        let mut counts_by_domain = IndexMap::new();
        for record in &records {
            *counts_by_domain
                .entry(record.metadata.domain.as_str().to_string())
                .or_insert(0) += 1;
        }
        let sample = records
            .iter()
            .filter(|r| only_domain.map_or(true, |d| r.metadata.domain == d))
            .take(sample_size)
            .cloned()
            .collect();
        Ok(PreviewReport {
            bot_id: bot_id.to_string(),
            files,
            counts_by_domain,
            sample,
            total_records: records.len(),
        })
    }

    pub fn ingest(&self, bot_id: &str) -> Result<IngestReport> {
        let dir = self.bot_dir(bot_id);
        let files = file_names(&dir)?;
        let records = Normalizer::new(bot_id)
            .normalize(&dir)
            .with_context(|| format!("failed to normalize {}", dir.display()))?;
        let catalog_entries = self.catalog.upsert(&records, bot_id)?;
        if records.is_empty() {
            warn!(bot_id, dir = %dir.display(), "no rows found, nothing to index");
            return Ok(IngestReport {
                bot_id: bot_id.to_string(),
                files,
                found_rows: 0,
                catalog_entries,
                collection: self.collection.clone(),
                count_now: self.count_or_zero()?,
            });
        }

        self.ensure_collection()?;
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.cache.embed_many(&texts, EmbedMode::Document)?;

        let mut batch = Vec::with_capacity(UPSERT_BATCH);
        let mut written = 0usize;
        for (record, vector) in records.iter().zip(vectors) {
            let id = point_id(bot_id, &record.metadata.chunk_id).to_string();
            let mut payload = record.to_payload()?;
            payload.insert(keys::POINT_UUID.to_string(), Value::String(id.clone()));
            batch.push(Point { id, vector, payload });
            if batch.len() >= UPSERT_BATCH {
                written += batch.len();
                self.flush(&mut batch)?;
                info!(bot_id, written, total = records.len(), "upserted batch");
            }
        }
        if !batch.is_empty() {
            written += batch.len();
            self.flush(&mut batch)?;
        }

        let count_now = self
            .index
            .count(&self.collection)
            .with_context(|| format!("failed to count {}", self.collection))?;
        info!(bot_id, rows = written, count_now, "ingestion finished");
        Ok(IngestReport {
            bot_id: bot_id.to_string(),
            files,
            found_rows: records.len(),
            catalog_entries,
            collection: self.collection.clone(),
            count_now,
        })
    }

    /// Drops the shared collection; with a bot id also clears that tenant's catalog.
    pub fn reset(&self, bot_id: Option<&str>) -> Result<ResetReport> {
        let dropped = self
            .index
            .drop_collection(&self.collection)
            .with_context(|| format!("failed to drop {}", self.collection))?;
        let catalog_removed = match bot_id {
            Some(bot_id) => self.catalog.reset(bot_id)?,
            None => 0,
        };
        info!(collection = %self.collection, dropped, catalog_removed, "reset");
        Ok(ResetReport {
            collection: self.collection.clone(),
            dropped,
            bot_id: bot_id.map(str::to_string),
            catalog_removed,
        })
    }

    pub fn health(&self) -> Result<HealthReport> {
        let dims = self.probe_dimensions()?;
        let collection_exists = self
            .index
            .collection_exists(&self.collection)
            .with_context(|| format!("failed to inspect {}", self.collection))?;
        Ok(HealthReport {
            embedding_model: self.cache.embedder().model().to_string(),
            dims,
            collection: self.collection.clone(),
            collection_exists,
        })
    }

    fn probe_dimensions(&self) -> Result<usize> {
        let vector = self
            .cache
            .embedder()
            .embed(DIM_PROBE, EmbedMode::Document)
            .context("embedding probe failed")?;
        Ok(vector.len())
    }

    fn ensure_collection(&self) -> Result<()> {
        if self.index.collection_exists(&self.collection)? {
            return Ok(());
        }
        let dims = self.probe_dimensions()?;
        self.index
            .create_collection(&self.collection, dims)
            .with_context(|| format!("failed to create {}", self.collection))?;
        info!(collection = %self.collection, dims, "created collection");
        Ok(())
    }

    fn flush(&self, batch: &mut Vec<Point>) -> Result<()> {
        let points = std::mem::take(batch);
        self.index
            .upsert(&self.collection, points)
            .with_context(|| format!("upsert into {} failed", self.collection))?;
        Ok(())
    }

    fn count_or_zero(&self) -> Result<u64> {
        if self.index.collection_exists(&self.collection)? {
            Ok(self.index.count(&self.collection)?)
        } else {
            Ok(0)
        }
    }
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let files = list_data_files(dir).with_context(|| format!("cannot list {}", dir.display()))?;
    Ok(files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmbeddingClient;
    use tabrag_index::MemoryIndex;

    const FEES: &str = "carrera,periodo,arancel_mensual\nMedicina,2024,\"$ 62.000\"\nMedicina,2025,\"$ 70.500\"\n";
    const GRANTS: &str = "beca,requisitos\nExcelencia,Promedio 8\n";

    fn pipeline(root: &Path) -> (IngestPipeline, Arc<MemoryIndex>) {
        let index = Arc::new(MemoryIndex::new());
        let cache = Arc::new(EmbeddingCache::in_memory(Arc::new(EmbeddingClient::hash(16))).unwrap());
        let catalog = Arc::new(CatalogStore::in_memory().unwrap());
        (IngestPipeline::new(root, catalog, cache, index.clone(), "admisiones"), index)
    }

    fn seed(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("aranceles.csv"), FEES).unwrap();
        std::fs::write(dir.join("becas.csv"), GRANTS).unwrap();
    }

    #[test]
    fn ingest_indexes_every_row_once() {
        let root = tempfile::tempdir().unwrap();
        seed(&root.path().join("b"));
        let (pipeline, index) = pipeline(root.path());

        let first = pipeline.ingest("b").unwrap();
        assert_eq!(first.found_rows, 3);
        assert_eq!(first.count_now, 3);
        assert_eq!(first.catalog_entries, 2);
        assert_eq!(first.files, ["aranceles.csv", "becas.csv"]);

        let again = pipeline.ingest("b").unwrap();
        assert_eq!(again.count_now, 3);
        assert_eq!(index.count("admisiones").unwrap(), 3);
        assert_eq!(pipeline.health().unwrap().dims, 16);
    }

    #[test]
    fn preview_counts_and_samples_without_indexing() {
        let root = tempfile::tempdir().unwrap();
        seed(root.path());
        let (pipeline, index) = pipeline(root.path());

        let report = pipeline.preview("b", Some(Domain::Becas), 5).unwrap();
        assert_eq!(report.total_records, 3);
        assert_eq!(report.counts_by_domain.get("aranceles"), Some(&2));
        assert_eq!(report.counts_by_domain.get("becas"), Some(&1));
        assert_eq!(report.sample.len(), 1);
        assert_eq!(report.sample[0].metadata.domain, Domain::Becas);
        assert!(!index.collection_exists("admisiones").unwrap());
    }

    #[test]
    fn ingest_requires_the_tenant_directory() {
        let root = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(root.path());
        assert!(pipeline.ingest("missing").is_err());
    }

    #[test]
    fn reset_drops_collection_and_tenant_catalog() {
        let root = tempfile::tempdir().unwrap();
        seed(&root.path().join("b"));
        let (pipeline, index) = pipeline(root.path());
        pipeline.ingest("b").unwrap();

        let report = pipeline.reset(Some("b")).unwrap();
        assert!(report.dropped);
        assert_eq!(report.catalog_removed, 1);
        assert!(!index.collection_exists("admisiones").unwrap());
        assert!(!pipeline.reset(None).unwrap().dropped);
    }
}
