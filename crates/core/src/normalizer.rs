use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aliases::{fields, AliasTable};
use crate::classify::classify;
use crate::error::Result;
use crate::money::{parse_amount, parse_count, parse_flag, round2};
use crate::record::{Domain, NumberValue, Record, RecordMetadata};
use crate::schema::{
    find_year, hash_str, make_chunk_id, make_doc_id, normalize_source_path, now_iso_utc,
    primary_key, slugify, GENERAL, SCHEMA_VERSION,
};
use crate::tabular::{list_data_files, read_sheets, Sheet};

const AMOUNT_FIELDS: [&str; 4] = [
    fields::ENROLLMENT_FEE,
    fields::FIRST_ENROLLMENT_FEE,
    fields::MONTHLY_FEE,
    fields::TOTAL_FEE,
];

const MONEY_COLUMN_KEYWORDS: [&str; 12] = [
    "matric", "arancel", "cuota", "mensual", "total", "inscrip", "pago", "importe", "precio",
    "valor", "costo", "coste",
];

/// Turns every supported file of a tenant directory into classified records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    bot_id: String,
}

impl Normalizer {
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// Files that fail to read are logged and skipped. Output order is
    /// file, then sheet, then row.
    pub fn normalize(&self, source_dir: &Path) -> Result<Vec<Record>> {
        let files = list_data_files(source_dir)?;
        let aliases = AliasTable::for_dir(source_dir);
        let per_file: Vec<Vec<Record>> = files
            .par_iter()
            .map(|path| match self.normalize_file(path, &aliases) {
                Ok(records) => records,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable source file");
                    Vec::new()
                }
            })
            .collect();
        let records: Vec<Record> = per_file.into_iter().flatten().collect();
        info!(
            bot_id = %self.bot_id,
            files = files.len(),
            records = records.len(),
            "normalized source directory"
        );
        Ok(records)
    }

    pub fn normalize_file(&self, path: &Path, aliases: &AliasTable) -> Result<Vec<Record>> {
        let sheets = read_sheets(path)?;
        let inserted_at = now_iso_utc();
        let mut records = Vec::new();
        for sheet in &sheets {
            let before = records.len();
            self.normalize_sheet(path, sheet, aliases, &inserted_at, &mut records);
            debug!(
                path = %path.display(),
                sheet = %sheet.name,
                rows = records.len() - before,
                "normalized sheet"
            );
        }
        Ok(records)
    }

    fn normalize_sheet(
        &self,
        path: &Path,
        sheet: &Sheet,
        aliases: &AliasTable,
        inserted_at: &str,
        out: &mut Vec<Record>,
    ) {
        if sheet.rows.iter().all(|row| Sheet::is_blank_row(row)) {
            return;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let columns = sheet.columns();
        let domain = classify(&file_name, &sheet.name, &columns);
        let doc_id = make_doc_id(path, &sheet.name);
        let source_path = normalize_source_path(path);

        for (index, (cells, typed)) in sheet.rows.iter().zip(&sheet.numbers).enumerate() {
            if Sheet::is_blank_row(cells) {
                continue;
            }
            let row = RowView {
                columns: &columns,
                cells,
                typed,
            };
            let text = row.text();
            if text.is_empty() {
                continue;
            }

            let title = row
                .first(aliases.candidates(fields::TITLE))
                .or_else(|| aliases.default_value(fields::TITLE))
                .or_else(|| row.first_non_empty())
                .unwrap_or(domain.as_str())
                .to_string();
            let faculty = row
                .first(aliases.candidates(fields::FACULTY))
                .or_else(|| aliases.default_value(fields::FACULTY))
                .map(str::to_string);
            let modality = row
                .first(aliases.candidates(fields::MODALITY))
                .or_else(|| aliases.default_value(fields::MODALITY))
                .unwrap_or(GENERAL)
                .to_string();
            let level = row.first(aliases.candidates(fields::LEVEL)).map(str::to_string);
            let period = row
                .first(aliases.candidates(fields::PERIOD))
                .or_else(|| aliases.default_value(fields::PERIOD))
                .or_else(|| find_year(&text))
                .or_else(|| find_year(&file_name))
                .unwrap_or(GENERAL)
                .to_string();
            let program_id = row
                .first(aliases.candidates(fields::PROGRAM_ID))
                .unwrap_or_default()
                .to_string();
            let program = program_name(&row, domain, aliases).map(str::to_string);

            let chunk_key = primary_key(domain.as_str(), &program_id, &period, index, &title);
            let metadata = RecordMetadata {
                schema_version: SCHEMA_VERSION,
                bot_id: self.bot_id.clone(),
                domain,
                doc_id: doc_id.clone(),
                chunk_id: make_chunk_id(&doc_id, &chunk_key),
                row_hash: hash_str(&text),
                inserted_at: inserted_at.to_string(),
                source_path: source_path.clone(),
                source_file: file_name.clone(),
                source_sheet: sheet.name.clone(),
                source_row: index,
                title,
                faculty_slug: faculty.as_deref().map(slugify),
                faculty,
                level,
                modality,
                period,
                program_slug: program.as_deref().map(slugify),
                program,
                program_id,
                numbers: extract_numbers(&row, aliases),
                extras: row.extras(),
            };
            out.push(Record { text, metadata });
        }
    }
}

/// Convenience wrapper over [`Normalizer::normalize`].
pub fn normalize(source_dir: &Path, bot_id: &str) -> Result<Vec<Record>> {
    Normalizer::new(bot_id).normalize(source_dir)
}

struct RowView<'a> {
    columns: &'a [String],
    cells: &'a [String],
    typed: &'a [Option<f64>],
}

impl<'a> RowView<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        let value = self.cells.get(idx)?.trim();
        (!value.is_empty()).then_some(value)
    }

    /// Numeric workbook cells are taken as-is; text goes through the money parser.
    fn amount(&self, column: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|c| c == column)?;
        match self.typed.get(idx).copied().flatten() {
            Some(value) => Some(value),
            None => parse_amount(self.get(column)?),
        }
    }

    fn first(&self, candidates: &[String]) -> Option<&'a str> {
        candidates.iter().find_map(|c| self.get(c))
    }

    fn first_non_empty(&self) -> Option<&'a str> {
        self.cells
            .iter()
            .map(|c| c.trim())
            .find(|c| !c.is_empty())
    }

    fn non_empty(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.columns
            .iter()
            .zip(self.cells.iter())
            .map(|(c, v)| (c.as_str(), v.trim()))
            .filter(|(_, v)| !v.is_empty())
    }

    /// `COLUMN: value | ...` over non-empty cells.
    fn text(&self) -> String {
        self.non_empty()
            .map(|(col, val)| format!("{}: {}", col.to_uppercase(), val))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn extras(&self) -> BTreeMap<String, String> {
        self.non_empty()
            .map(|(col, val)| (col.to_string(), val.to_string()))
            .collect()
    }
}

fn program_name<'a>(row: &RowView<'a>, domain: Domain, aliases: &AliasTable) -> Option<&'a str> {
    if domain.is_program_domain() {
        row.get(fields::PROGRAM).or_else(|| row.get(fields::ALIAS))
    } else {
        row.first(aliases.candidates(fields::PROGRAM))
            .or_else(|| row.get(fields::ALIAS))
    }
}

fn extract_numbers(row: &RowView<'_>, aliases: &AliasTable) -> BTreeMap<String, NumberValue> {
    let mut numbers = BTreeMap::new();
    for field in AMOUNT_FIELDS {
        let parsed = aliases
            .candidates(field)
            .iter()
            .find_map(|c| row.amount(c));
        if let Some(value) = parsed {
            numbers.insert(field.to_string(), NumberValue::Amount(value));
        }
    }

    let plan_columns = aliases.columns_for(&[fields::INSTALLMENTS, fields::HAS_PAYMENT_PLAN]);
    if numbers.is_empty() {
        for (column, _) in row.non_empty() {
            if plan_columns.contains(&column)
                || !MONEY_COLUMN_KEYWORDS.iter().any(|kw| column.contains(kw))
            {
                continue;
            }
            let Some(amount) = row.amount(column) else {
                continue;
            };
            let key = if column.contains("mensual") || column.contains("cuota") {
                fields::MONTHLY_FEE.to_string()
            } else if column.contains("total") {
                fields::TOTAL_FEE.to_string()
            } else if column.contains("matric") || column.contains("inscrip") {
                fields::ENROLLMENT_FEE.to_string()
            } else {
                format!("otra_cifra_{}", column.chars().take(18).collect::<String>())
            };
            numbers.entry(key).or_insert(NumberValue::Amount(amount));
        }
    }

    if let Some(count) = row
        .first(aliases.candidates(fields::INSTALLMENTS))
        .and_then(parse_count)
    {
        numbers.insert(fields::INSTALLMENTS.to_string(), NumberValue::Count(count));
    }
    if let Some(flag) = row.first(aliases.candidates(fields::HAS_PAYMENT_PLAN)) {
        numbers.insert(
            fields::HAS_PAYMENT_PLAN.to_string(),
            NumberValue::Flag(parse_flag(flag)),
        );
    }

    if !numbers.contains_key(fields::TOTAL_FEE) {
        let monthly = numbers.get(fields::MONTHLY_FEE).and_then(NumberValue::as_f64);
        let count = numbers.get(fields::INSTALLMENTS).and_then(NumberValue::as_f64);
        if let (Some(monthly), Some(count)) = (monthly, count) {
            if monthly != 0.0 && count != 0.0 {
                numbers.insert(
                    fields::ESTIMATED_TOTAL.to_string(),
                    NumberValue::Amount(round2(monthly * count)),
                );
            }
        }
    }
    numbers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn aranceles_row_gets_program_numbers_and_derived_total() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "aranceles.csv",
            "Carrera;Periodo;Arancel Mensual;Cant Cuotas Plan Pagos;Tiene Plan Pagos\n\
             Medicina;2024;$ 62.000,00;10;Sí\n",
        );
        let records = normalize(dir.path(), "public-admisiones").unwrap();
        assert_eq!(records.len(), 1);
        let meta = &records[0].metadata;
        assert_eq!(meta.domain, Domain::Aranceles);
        assert_eq!(meta.program.as_deref(), Some("Medicina"));
        assert_eq!(meta.program_slug.as_deref(), Some("medicina"));
        assert_eq!(meta.program_id, "");
        assert_eq!(meta.period, "2024");
        assert_eq!(meta.modality, "general");
        assert_eq!(meta.numbers[fields::MONTHLY_FEE], NumberValue::Amount(62000.0));
        assert_eq!(meta.numbers[fields::INSTALLMENTS], NumberValue::Count(10));
        assert_eq!(meta.numbers[fields::HAS_PAYMENT_PLAN], NumberValue::Flag(true));
        assert_eq!(meta.numbers[fields::ESTIMATED_TOTAL], NumberValue::Amount(620000.0));
        assert!(records[0].text.starts_with("CARRERA: Medicina | PERIODO: 2024"));
    }

    #[test]
    fn explicit_total_suppresses_estimate() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "aranceles.csv",
            "carrera,arancel_mensual,arancel_total,cant_cuotas_plan_pagos\nDerecho,100,900,10\n",
        );
        let records = normalize(dir.path(), "b").unwrap();
        let numbers = &records[0].metadata.numbers;
        assert!(!numbers.contains_key(fields::ESTIMATED_TOTAL));
        assert_eq!(numbers[fields::TOTAL_FEE], NumberValue::Amount(900.0));
    }

    #[test]
    fn keyword_heuristic_only_runs_when_aliases_miss() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "costos.csv",
            "concepto,costo_examen,cuota_social\nExamen,1500,300\n",
        );
        let records = normalize(dir.path(), "b").unwrap();
        let numbers = &records[0].metadata.numbers;
        assert_eq!(numbers["otra_cifra_costo_examen"], NumberValue::Amount(1500.0));
        assert_eq!(numbers[fields::MONTHLY_FEE], NumberValue::Amount(300.0));
    }

    #[test]
    fn program_is_absent_when_unknown_and_period_falls_back_to_file_name() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "becas_2025.csv",
            "nombre,cobertura\nBeca al mérito,50%\n",
        );
        let records = normalize(dir.path(), "b").unwrap();
        let meta = &records[0].metadata;
        assert_eq!(meta.domain, Domain::Becas);
        assert_eq!(meta.program, None);
        assert_eq!(meta.program_slug, None);
        assert_eq!(meta.title, "Beca al mérito");
        assert_eq!(meta.period, "2025");
    }

    #[test]
    fn schema_map_defaults_fill_gaps() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "_schema_map.json",
            r#"{"aliases": {"facultad": ["Unidad"]}, "defaults": {"periodo": "2026", "modalidad": "Presencial"}}"#,
        );
        write(dir.path(), "carreras.csv", "carrera,unidad\nAbogacía,Derecho\n");
        let records = normalize(dir.path(), "b").unwrap();
        let meta = &records[0].metadata;
        assert_eq!(meta.domain, Domain::Carreras);
        assert_eq!(meta.faculty.as_deref(), Some("Derecho"));
        assert_eq!(meta.faculty_slug.as_deref(), Some("derecho"));
        assert_eq!(meta.period, "2026");
        assert_eq!(meta.modality, "Presencial");
    }

    #[test]
    fn blank_rows_are_skipped_but_keep_row_positions() {
        let dir = tempdir().unwrap();
        write(dir.path(), "faq.csv", "pregunta,respuesta\n,\nHorario?,De 8 a 20\n");
        let records = normalize(dir.path(), "b").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.source_row, 1);
        assert_eq!(records[0].metadata.domain, Domain::Faq);
        assert_eq!(records[0].metadata.period, GENERAL);
    }

    #[test]
    fn typed_workbook_amounts_skip_the_locale_parser() {
        let sheet = Sheet::typed(
            "Hoja1",
            vec!["carrera".into(), "arancel_mensual".into()],
            vec![vec!["Medicina".into(), "125.375".into()]],
            vec![vec![None, Some(125.375)]],
        );
        let mut records = Vec::new();
        Normalizer::new("b").normalize_sheet(
            Path::new("aranceles.xlsx"),
            &sheet,
            &AliasTable::builtin(),
            "2025-01-01T00:00:00Z",
            &mut records,
        );
        assert_eq!(records[0].metadata.numbers[fields::MONTHLY_FEE], NumberValue::Amount(125.375));

        // the same text from a delimited file reads as thousands
        let text_only = Sheet::new("CSV", sheet.headers.clone(), sheet.rows.clone());
        let mut records = Vec::new();
        Normalizer::new("b").normalize_sheet(
            Path::new("aranceles.csv"),
            &text_only,
            &AliasTable::builtin(),
            "2025-01-01T00:00:00Z",
            &mut records,
        );
        assert_eq!(records[0].metadata.numbers[fields::MONTHLY_FEE], NumberValue::Amount(125375.0));
    }

    #[test]
    fn bad_file_does_not_abort_the_directory() {
        let dir = tempdir().unwrap();
        write(dir.path(), "aaa_roto.xlsx", "not a workbook");
        write(dir.path(), "oferta.csv", "titulo,modalidad\nEnfermería,Virtual\n");
        let records = normalize(dir.path(), "b").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.domain, Domain::Oferta);
        assert_eq!(records[0].metadata.modality, "Virtual");
    }
}
