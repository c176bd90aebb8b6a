use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use chrono::Timelike;
use csv::ReaderBuilder;
use flate2::read::MultiGzDecoder;
use glob::Pattern;
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::schema::slugify_column;

pub const DATA_FILE_PATTERN: &str = "*.xlsx,*.xlsm,*.xls,*.ods,*.csv,*.tsv,*.txt,*.csv.gz,*.tsv.gz";

const SNIFF_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Workbook,
    Csv,
    Tsv,
    Text,
    CsvGz,
    TsvGz,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".csv.gz") {
            return Some(SourceFormat::CsvGz);
        }
        if name.ends_with(".tsv.gz") {
            return Some(SourceFormat::TsvGz);
        }
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => Some(SourceFormat::Workbook),
            "csv" => Some(SourceFormat::Csv),
            "tsv" => Some(SourceFormat::Tsv),
            "txt" => Some(SourceFormat::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Workbook => "workbook",
            SourceFormat::Csv => "csv",
            SourceFormat::Tsv => "tsv",
            SourceFormat::Text => "txt",
            SourceFormat::CsvGz => "csv.gz",
            SourceFormat::TsvGz => "tsv.gz",
        }
    }
}

/// One table: raw header cells plus trimmed string cells, padded to the header width.
/// `numbers` mirrors `rows` and holds the typed value of numeric workbook cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub numbers: Vec<Vec<Option<f64>>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let numbers = rows.iter().map(|_| Vec::new()).collect();
        Self::typed(name, headers, rows, numbers)
    }

    pub fn typed(
        name: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        numbers: Vec<Vec<Option<f64>>>,
    ) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(headers.len());
        let mut headers = headers;
        headers.resize(width, String::new());
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect::<Vec<_>>();
        let mut numbers = numbers;
        numbers.resize(rows.len(), Vec::new());
        for row in &mut numbers {
            row.resize(width, None);
        }
        Self {
            name: name.into(),
            headers,
            rows,
            numbers,
        }
    }

    /// Slugified, de-duplicated column names.
    pub fn columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.headers.len());
        for (idx, header) in self.headers.iter().enumerate() {
            let base = slugify_column(header, idx);
            let mut candidate = base.clone();
            let mut n = 2;
            while out.contains(&candidate) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            out.push(candidate);
        }
        out
    }

    pub fn is_blank_row(row: &[String]) -> bool {
        row.iter().all(|cell| cell.trim().is_empty())
    }
}

/// Supported data files directly under `dir` (no recursion), sorted by path.
pub fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CoreError::MissingSourceDir(dir.to_path_buf()));
    }
    let patterns = build_patterns(DATA_FILE_PATTERN)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.starts_with('_') || name.starts_with('~') {
            continue;
        }
        if patterns.iter().any(|pat| pat.matches(&name)) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn build_patterns(pattern: &str) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    for raw in pattern.split(',') {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        patterns.push(Pattern::new(&trimmed.to_lowercase()).map_err(|e| CoreError::Pattern(e.msg.to_string()))?);
    }
    Ok(patterns)
}

pub fn read_sheets(path: &Path) -> Result<Vec<Sheet>> {
    let format =
        SourceFormat::from_path(path).ok_or_else(|| CoreError::UnsupportedInput(path.to_path_buf()))?;
    match format {
        SourceFormat::Workbook => read_workbook(path),
        SourceFormat::Csv | SourceFormat::Text => {
            let file = open(path)?;
            Ok(vec![read_delimited(path, file, None, "CSV")?])
        }
        SourceFormat::Tsv => {
            let file = open(path)?;
            Ok(vec![read_delimited(path, file, Some(b'\t'), "TSV")?])
        }
        SourceFormat::CsvGz => {
            let decoder = MultiGzDecoder::new(open(path)?);
            Ok(vec![read_delimited(path, decoder, None, "CSV")?])
        }
        SourceFormat::TsvGz => {
            let decoder = MultiGzDecoder::new(open(path)?);
            Ok(vec![read_delimited(path, decoder, Some(b'\t'), "TSV")?])
        }
    }
}

fn open(path: &Path) -> Result<fs::File> {
    fs::File::open(path).map_err(|err| CoreError::source_read(path, err))
}

fn read_workbook(path: &Path) -> Result<Vec<Sheet>> {
    let mut workbook = open_workbook_auto(path).map_err(|err| CoreError::source_read(path, err))?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|err| CoreError::source_read(path, format!("sheet {name}: {err}")))?;
        if let Some(sheet) = sheet_from_range(&name, &range) {
            sheets.push(sheet);
        }
    }
    Ok(sheets)
}

/// First row is the header; `None` for an empty range.
fn sheet_from_range(name: &str, range: &Range<Data>) -> Option<Sheet> {
    let mut rows = range.rows();
    let headers: Vec<String> = rows.next()?.iter().map(cell_to_string).collect();
    let mut text: Vec<Vec<String>> = Vec::new();
    let mut numbers: Vec<Vec<Option<f64>>> = Vec::new();
    for row in rows {
        text.push(row.iter().map(cell_to_string).collect());
        numbers.push(row.iter().map(cell_number).collect());
    }
    Some(Sheet::typed(name, headers, text, numbers))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.trim().to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::DateTime(_) => match cell.as_datetime() {
            Some(at) if at.num_seconds_from_midnight() == 0 => at.format("%Y-%m-%d").to_string(),
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string().trim().to_string(),
        },
        other => other.to_string().trim().to_string(),
    }
}

fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(value) => Some(*value),
        Data::Int(value) => Some(*value as f64),
        _ => None,
    }
}

fn read_delimited<R: Read>(
    path: &Path,
    mut reader: R,
    delimiter: Option<u8>,
    sheet_name: &str,
) -> Result<Sheet> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|err| CoreError::source_read(path, err))?;
    let text = decode_text(bytes);
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(&text));
    let mut csv = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in csv.records() {
        let record = record.map_err(|err| CoreError::source_read(path, format!("invalid row: {err}")))?;
        rows.push(record.iter().map(|cell| cell.trim().to_string()).collect::<Vec<_>>());
    }
    if rows.is_empty() {
        return Ok(Sheet::new(sheet_name, Vec::new(), Vec::new()));
    }
    let headers = rows.remove(0);
    Ok(Sheet::new(sheet_name, headers, rows))
}

/// UTF-8 (with or without BOM), falling back to Latin-1.
fn decode_text(bytes: Vec<u8>) -> String {
    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(&bytes);
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => body.iter().map(|&b| b as char).collect(),
    }
}

/// Picks the candidate delimiter that appears most often in the header line.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let mut best = (b',', 0usize);
    for candidate in SNIFF_CANDIDATES {
        let count = header.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}
