use std::path::{Component, Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

pub const SCHEMA_VERSION: u32 = 1;

/// Slug used when a value folds down to nothing.
pub const GENERAL: &str = "general";

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(19|20)\d{2}").expect("valid regex"));

/// Lowercases and strips diacritics, keeping everything else as-is.
pub fn fold(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| c.is_ascii() || !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// ASCII slug: accents folded, lowercase, runs of non-alphanumerics collapsed to `_`.
pub fn slugify(value: &str) -> String {
    let slug = slug_body(value);
    if slug.is_empty() {
        GENERAL.to_string()
    } else {
        slug
    }
}

/// Column-name slug. Unlike [`slugify`] an empty header gets a positional name so
/// it cannot collide with real data.
pub fn slugify_column(name: &str, index: usize) -> String {
    let slug = slug_body(name);
    if slug.is_empty() {
        format!("unnamed_{index}")
    } else {
        slug
    }
}

fn slug_body(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for ch in value.trim().nfkd() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii() || !is_combining_mark(ch) {
            pending_sep = true;
        }
    }
    out
}

fn is_combining_mark(ch: char) -> bool {
    matches!(ch as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

pub fn hash_str(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lexically normalized path (no `.` segments, forward slashes).
pub fn normalize_source_path(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().replace('\\', "/")
}

pub fn make_doc_id(source_path: &Path, sheet_name: &str) -> String {
    hash_str(&format!("{}|{}", normalize_source_path(source_path), sheet_name))
}

pub fn make_chunk_id(doc_id: &str, primary_key: &str) -> String {
    hash_str(&format!("{doc_id}|{primary_key}"))
}

/// Stable per-row key: program id beats title, title beats row position.
pub fn primary_key(domain: &str, program_id: &str, period: &str, row: usize, title: &str) -> String {
    let period = match period.trim() {
        "" => "all",
        p => p,
    };
    let program_id = program_id.trim();
    if !program_id.is_empty() {
        return format!("{domain}:{program_id}:{period}");
    }
    if !title.trim().is_empty() {
        return format!("{domain}:{}:{period}", slugify(title));
    }
    format!("{domain}:row-{row}:{period}")
}

pub fn find_year(text: &str) -> Option<&str> {
    YEAR_RE.find(text).map(|m| m.as_str())
}

pub fn now_iso_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
