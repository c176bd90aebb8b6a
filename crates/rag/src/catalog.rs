use anyhow::{Context, Result};
use indexmap::IndexSet;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use tabrag_core::{fold, slugify, Record};

pub const DEFAULT_THRESHOLD: u8 = 82;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS catalog_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bot_id TEXT NOT NULL,
        program_id TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        faculty TEXT,
        level TEXT,
        periods TEXT NOT NULL DEFAULT '[]',
        aliases TEXT NOT NULL DEFAULT '[]',
        UNIQUE (bot_id, program_id, slug)
    );
"#;

/// One named program of a tenant. `periods` and `aliases` only ever grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub bot_id: String,
    pub program_id: String,
    pub name: String,
    pub slug: String,
    pub faculty: Option<String>,
    pub level: Option<String>,
    pub periods: IndexSet<String>,
    pub aliases: IndexSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogMatch {
    pub program_id: String,
    pub name: String,
    pub slug: String,
    pub faculty: Option<String>,
    pub level: Option<String>,
    pub score: u8,
}

pub struct CatalogStore {
    conn: Mutex<Connection>,
}

impl CatalogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open catalog {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Folds program-bearing records into the catalog. Returns how many records
    /// contributed to an entry.
    pub fn upsert(&self, records: &[Record], bot_id: &str) -> Result<usize> {
        let sightings: Vec<CatalogEntry> = records
            .iter()
            .filter_map(|record| sighting(record, bot_id))
            .collect();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for entry in &sightings {
            merge_entry(&tx, entry)?;
        }
        tx.commit()?;
        debug!(bot_id, sightings = sightings.len(), "catalog upsert");
        Ok(sightings.len())
    }

    pub fn entries(&self, bot_id: &str) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT bot_id, program_id, name, slug, faculty, level, periods, aliases
             FROM catalog_entries WHERE bot_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![bot_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (bot_id, program_id, name, slug, faculty, level, periods, aliases) = row?;
            out.push(CatalogEntry {
                periods: decode_set(&periods, &slug),
                aliases: decode_set(&aliases, &slug),
                bot_id,
                program_id,
                name,
                slug,
                faculty,
                level,
            });
        }
        Ok(out)
    }

    /// Every entry scored against `text`, best first. Ties keep catalog order.
    pub fn search_candidates(&self, bot_id: &str, text: &str, limit: usize) -> Result<Vec<CatalogMatch>> {
        let query = text.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<CatalogMatch> = self
            .entries(bot_id)?
            .into_iter()
            .map(|entry| {
                let score = std::iter::once(entry.name.as_str())
                    .chain(entry.aliases.iter().map(String::as_str))
                    .map(|candidate| partial_ratio(query, candidate))
                    .max()
                    .unwrap_or(0);
                CatalogMatch {
                    program_id: entry.program_id,
                    name: entry.name,
                    slug: entry.slug,
                    faculty: entry.faculty,
                    level: entry.level,
                    score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    pub fn resolve(&self, bot_id: &str, text: &str, threshold: u8) -> Result<Option<CatalogMatch>> {
        let best = self.search_candidates(bot_id, text, 1)?.into_iter().next();
        Ok(best.filter(|m| m.score >= threshold))
    }

    /// Removes every entry of `bot_id`.
    pub fn reset(&self, bot_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM catalog_entries WHERE bot_id = ?1", params![bot_id])?;
        Ok(removed)
    }
}

fn sighting(record: &Record, bot_id: &str) -> Option<CatalogEntry> {
    let meta = &record.metadata;
    if !meta.domain.is_program_domain() {
        return None;
    }
    let name = meta
        .program
        .as_deref()
        .unwrap_or(meta.title.as_str())
        .trim()
        .to_string();
    if name.is_empty() {
        return None;
    }
    let mut aliases = IndexSet::new();
    aliases.insert(name.clone());
    let extras = ["alias", "alias_carrera", "nombre_programa"]
        .iter()
        .filter_map(|key| meta.extras.get(*key));
    for alias in std::iter::once(&meta.title).chain(extras) {
        let alias = alias.trim();
        if !alias.is_empty() {
            aliases.insert(alias.to_string());
        }
    }
    let mut periods = IndexSet::new();
    let period = meta.period.trim();
    if !period.is_empty() {
        periods.insert(period.to_string());
    }
    Some(CatalogEntry {
        bot_id: bot_id.to_string(),
        program_id: meta.program_id.trim().to_string(),
        slug: slugify(&name),
        name,
        faculty: non_blank(meta.faculty.as_deref()),
        level: non_blank(meta.level.as_deref()),
        periods,
        aliases,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn merge_entry(tx: &Transaction<'_>, entry: &CatalogEntry) -> Result<()> {
    let existing = tx
        .query_row(
            "SELECT periods, aliases FROM catalog_entries
             WHERE bot_id = ?1 AND program_id = ?2 AND slug = ?3",
            params![entry.bot_id, entry.program_id, entry.slug],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    match existing {
        Some((periods, aliases)) => {
            let mut periods = decode_set(&periods, &entry.slug);
            periods.extend(entry.periods.iter().cloned());
            let mut aliases = decode_set(&aliases, &entry.slug);
            aliases.extend(entry.aliases.iter().cloned());
            tx.execute(
                "UPDATE catalog_entries
                 SET faculty = COALESCE(faculty, ?4),
                     level = COALESCE(level, ?5),
                     periods = ?6,
                     aliases = ?7
                 WHERE bot_id = ?1 AND program_id = ?2 AND slug = ?3",
                params![
                    entry.bot_id,
                    entry.program_id,
                    entry.slug,
                    entry.faculty,
                    entry.level,
                    serde_json::to_string(&periods)?,
                    serde_json::to_string(&aliases)?,
                ],
            )?;
        }
        None => {
            tx.execute(
                "INSERT INTO catalog_entries (bot_id, program_id, name, slug, faculty, level, periods, aliases)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.bot_id,
                    entry.program_id,
                    entry.name,
                    entry.slug,
                    entry.faculty,
                    entry.level,
                    serde_json::to_string(&entry.periods)?,
                    serde_json::to_string(&entry.aliases)?,
                ],
            )?;
        }
    }
    Ok(())
}

fn decode_set(raw: &str, slug: &str) -> IndexSet<String> {
    match serde_json::from_str(raw) {
        Ok(set) => set,
        Err(err) => {
            warn!(slug, error = %err, "unreadable catalog set, treating as empty");
            IndexSet::new()
        }
    }
}

/// Best Indel similarity (0-100) of the shorter string against every
/// same-length window of the longer one, plus the partial overlaps at both
/// edges, after case and accent folding.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = fold(a.trim()).chars().collect();
    let b: Vec<char> = fold(b.trim()).chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let n = short.len();
    let edges = (1..n).flat_map(|len| [&long[..len], &long[long.len() - len..]]);
    let mut best = 0.0f64;
    for window in long.windows(n).chain(edges) {
        let similarity = indel_ratio(&short, window);
        if similarity > best {
            best = similarity;
            if best >= 1.0 {
                break;
            }
        }
    }
    (best * 100.0).round() as u8
}

/// `2 * lcs / (|a| + |b|)`: one minus the normalized insert/delete distance.
fn indel_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diagonal = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb { diagonal + 1 } else { above.max(row[j]) };
            diagonal = above;
        }
    }
    (2 * row[b.len()]) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tabrag_core::{Domain, RecordMetadata};

    fn record(domain: Domain, program: Option<&str>, title: &str, period: &str) -> Record {
        Record {
            text: format!("CARRERA: {title}"),
            metadata: RecordMetadata {
                schema_version: 1,
                bot_id: "b".into(),
                domain,
                doc_id: "d".into(),
                chunk_id: format!("{title}-{period}"),
                row_hash: "h".into(),
                inserted_at: "2024-01-01T00:00:00Z".into(),
                source_path: "x.csv".into(),
                source_file: "x.csv".into(),
                source_sheet: "CSV".into(),
                source_row: 0,
                title: title.into(),
                faculty: None,
                faculty_slug: None,
                level: None,
                modality: "general".into(),
                period: period.into(),
                program: program.map(str::to_string),
                program_id: String::new(),
                program_slug: program.map(slugify),
                numbers: BTreeMap::new(),
                extras: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn partial_ratio_finds_embedded_names() {
        assert_eq!(partial_ratio("cuánto sale la mensualidad de medicina", "Medicina"), 100);
        assert_eq!(partial_ratio("MEDICINA", "medicina"), 100);
        assert!(partial_ratio("horarios de biblioteca", "Medicina") < DEFAULT_THRESHOLD);
        assert_eq!(partial_ratio("", "Medicina"), 0);
    }

    #[test]
    fn one_letter_typos_stay_above_threshold() {
        assert_eq!(partial_ratio("medicna", "Medicina"), 86);
        assert!(partial_ratio("cuanto sale medicna", "Medicina") >= DEFAULT_THRESHOLD);
        assert!(partial_ratio("abogasia", "Abogacía") >= DEFAULT_THRESHOLD);
        assert_eq!(indel_ratio(&['a', 'b'], &['a', 'b']), 1.0);
        assert_eq!(indel_ratio(&['a'], &['b']), 0.0);
    }

    #[test]
    fn resolve_binds_misspelled_program() {
        let store = CatalogStore::in_memory().unwrap();
        store
            .upsert(&[record(Domain::Carreras, Some("Medicina"), "Medicina", "2025")], "b")
            .unwrap();
        let hit = store.resolve("b", "cuanto sale medicna", DEFAULT_THRESHOLD).unwrap();
        assert_eq!(hit.map(|m| m.name), Some("Medicina".to_string()));
    }

    #[test]
    fn upsert_merges_periods_and_aliases() {
        let store = CatalogStore::in_memory().unwrap();
        let mut first = record(Domain::Aranceles, Some("Medicina"), "Medicina", "2024");
        first.metadata.faculty = Some("Ciencias Médicas".into());
        store.upsert(&[first], "b").unwrap();
        let mut second = record(Domain::Carreras, Some("Medicina"), "Médico", "2025");
        second.metadata.faculty = Some("Otra".into());
        second.metadata.extras.insert("alias".into(), "Med".into());
        store.upsert(&[second], "b").unwrap();

        let entries = store.entries("b").unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.periods.iter().collect::<Vec<_>>(), ["2024", "2025"]);
        assert_eq!(entry.aliases.iter().collect::<Vec<_>>(), ["Medicina", "Médico", "Med"]);
        assert_eq!(entry.faculty.as_deref(), Some("Ciencias Médicas"));
    }

    proptest::proptest! {
        #[test]
        fn merge_only_grows_periods(years in proptest::collection::vec(2000u32..2040, 1..12)) {
            let store = CatalogStore::in_memory().unwrap();
            let mut seen: Vec<String> = Vec::new();
            for year in &years {
                let period = year.to_string();
                store
                    .upsert(&[record(Domain::Carreras, Some("Medicina"), "Medicina", &period)], "b")
                    .unwrap();
                if !seen.contains(&period) {
                    seen.push(period);
                }
                let entries = store.entries("b").unwrap();
                proptest::prop_assert_eq!(entries.len(), 1);
                let periods: Vec<String> = entries[0].periods.iter().cloned().collect();
                proptest::prop_assert_eq!(&periods, &seen);
            }
        }
    }

    #[test]
    fn non_program_domains_and_blank_names_are_ignored() {
        let store = CatalogStore::in_memory().unwrap();
        let touched = store
            .upsert(
                &[
                    record(Domain::Becas, Some("Medicina"), "Beca", "2025"),
                    record(Domain::Oferta, None, "  ", "2025"),
                ],
                "b",
            )
            .unwrap();
        assert_eq!(touched, 0);
        assert!(store.entries("b").unwrap().is_empty());
    }

    #[test]
    fn resolve_respects_threshold_and_tenant() {
        let store = CatalogStore::in_memory().unwrap();
        store
            .upsert(&[record(Domain::Carreras, Some("Medicina"), "Medicina", "2025")], "b")
            .unwrap();
        let hit = store.resolve("b", "cuanto sale medicina", DEFAULT_THRESHOLD).unwrap();
        assert_eq!(hit.map(|m| m.name), Some("Medicina".to_string()));
        assert!(store.resolve("b", "horarios de biblioteca", DEFAULT_THRESHOLD).unwrap().is_none());
        assert!(store.resolve("other", "medicina", DEFAULT_THRESHOLD).unwrap().is_none());
        assert!(store.search_candidates("b", "   ", 5).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_first_seen_entry() {
        let store = CatalogStore::in_memory().unwrap();
        store
            .upsert(
                &[
                    record(Domain::Carreras, Some("Derecho"), "Derecho", "2025"),
                    record(Domain::Oferta, Some("Derecho"), "Derecho", "2025"),
                ],
                "b",
            )
            .unwrap();
        store
            .upsert(&[record(Domain::Carreras, Some("Abogacía"), "Derecho", "2025")], "b")
            .unwrap();
        let ranked = store.search_candidates("b", "derecho", 5).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, 100);
        assert_eq!(ranked[1].score, 100);
        assert_eq!(ranked[0].name, "Derecho");
    }

    #[test]
    fn reset_only_touches_one_tenant() {
        let store = CatalogStore::in_memory().unwrap();
        let rec = record(Domain::Carreras, Some("Medicina"), "Medicina", "2025");
        store.upsert(std::slice::from_ref(&rec), "a").unwrap();
        store.upsert(std::slice::from_ref(&rec), "b").unwrap();
        assert_eq!(store.reset("a").unwrap(), 1);
        assert!(store.entries("a").unwrap().is_empty());
        assert_eq!(store.entries("b").unwrap().len(), 1);
    }
}
