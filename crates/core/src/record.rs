use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload keys shared by the normalizer, the index filters and the retriever.
pub mod keys {
    pub const BOT_ID: &str = "bot_id";
    pub const DOMAIN: &str = "domain";
    pub const CHUNK_ID: &str = "chunk_id";
    pub const PROGRAM: &str = "carrera";
    pub const PROGRAM_ID: &str = "carrera_id";
    pub const FACULTY: &str = "facultad";
    pub const MODALITY: &str = "modalidad";
    pub const PERIOD: &str = "periodo";
    pub const TITLE: &str = "titulo";
    pub const TEXT: &str = "text";
    pub const POINT_UUID: &str = "point_uuid";
    pub const SOURCE_FILE: &str = "fuente_archivo";
    pub const SOURCE_SHEET: &str = "fuente_hoja";
    pub const SOURCE_ROW: &str = "fuente_fila";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    General,
    Oferta,
    Carreras,
    Aranceles,
    Becas,
    Fechas,
    Reglamentos,
    Faq,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::General,
        Domain::Oferta,
        Domain::Carreras,
        Domain::Aranceles,
        Domain::Becas,
        Domain::Fechas,
        Domain::Reglamentos,
        Domain::Faq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::General => "general",
            Domain::Oferta => "oferta",
            Domain::Carreras => "carreras",
            Domain::Aranceles => "aranceles",
            Domain::Becas => "becas",
            Domain::Fechas => "fechas",
            Domain::Reglamentos => "reglamentos",
            Domain::Faq => "faq",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|d| d.as_str() == lower)
    }

    /// Domains whose rows describe a program and therefore feed the catalog.
    pub fn is_program_domain(&self) -> bool {
        matches!(self, Domain::Carreras | Domain::Oferta | Domain::Aranceles)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberValue {
    Flag(bool),
    Count(i64),
    Amount(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NumberValue::Flag(_) => None,
            NumberValue::Count(v) => Some(*v as f64),
            NumberValue::Amount(v) => Some(*v),
        }
    }
}

/// Canonical metadata for one normalized row.
///
/// `program_id` is always present (empty when unknown) while `program` is absent
/// when no program name was found; filter construction depends on the difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub schema_version: u32,
    pub bot_id: String,
    pub domain: Domain,
    pub doc_id: String,
    pub chunk_id: String,
    pub row_hash: String,
    pub inserted_at: String,
    pub source_path: String,
    #[serde(rename = "fuente_archivo")]
    pub source_file: String,
    #[serde(rename = "fuente_hoja")]
    pub source_sheet: String,
    #[serde(rename = "fuente_fila")]
    pub source_row: usize,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "facultad", default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(rename = "facultad_slug", default, skip_serializing_if = "Option::is_none")]
    pub faculty_slug: Option<String>,
    #[serde(rename = "nivel", default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(rename = "modalidad")]
    pub modality: String,
    #[serde(rename = "periodo")]
    pub period: String,
    #[serde(rename = "carrera", default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(rename = "carrera_id", default)]
    pub program_id: String,
    #[serde(rename = "carrera_slug", default, skip_serializing_if = "Option::is_none")]
    pub program_slug: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub numbers: BTreeMap<String, NumberValue>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub text: String,
    pub metadata: RecordMetadata,
}

impl Record {
    /// Flattened index payload: the metadata keys plus the row text under `text`.
    pub fn to_payload(&self) -> serde_json::Result<Map<String, Value>> {
        let mut payload = match serde_json::to_value(&self.metadata)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert(keys::TEXT.to_string(), Value::String(self.text.clone()));
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            text: "CARRERA: Medicina | ARANCEL_MENSUAL: 62.000".to_string(),
            metadata: RecordMetadata {
                schema_version: 1,
                bot_id: "public-admisiones".to_string(),
                domain: Domain::Aranceles,
                doc_id: "d".to_string(),
                chunk_id: "c".to_string(),
                row_hash: "h".to_string(),
                inserted_at: "2024-01-01T00:00:00Z".to_string(),
                source_path: "data/aranceles.csv".to_string(),
                source_file: "aranceles.csv".to_string(),
                source_sheet: "CSV".to_string(),
                source_row: 0,
                title: "Medicina".to_string(),
                faculty: None,
                faculty_slug: None,
                level: None,
                modality: "general".to_string(),
                period: "2024".to_string(),
                program: None,
                program_id: String::new(),
                program_slug: None,
                numbers: BTreeMap::new(),
                extras: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn payload_drops_absent_keys_but_keeps_empty_program_id() {
        let payload = sample().to_payload().unwrap();
        assert!(!payload.contains_key(keys::PROGRAM));
        assert!(!payload.contains_key(keys::FACULTY));
        assert!(!payload.contains_key("numbers"));
        assert_eq!(payload[keys::PROGRAM_ID], Value::String(String::new()));
        assert_eq!(payload[keys::DOMAIN], Value::String("aranceles".into()));
        assert!(payload[keys::TEXT].as_str().unwrap().contains("Medicina"));
    }

    #[test]
    fn numbers_keep_their_kind_through_json() {
        let mut record = sample();
        record.metadata.numbers.insert("arancel_mensual".into(), NumberValue::Amount(62000.0));
        record.metadata.numbers.insert("cant_cuotas_plan_pagos".into(), NumberValue::Count(10));
        record.metadata.numbers.insert("tiene_plan_pagos".into(), NumberValue::Flag(true));
        let json = serde_json::to_string(&record.metadata).unwrap();
        let back: RecordMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.numbers, record.metadata.numbers);
    }

    #[test]
    fn domain_parse_is_case_insensitive() {
        assert_eq!(Domain::parse(" Aranceles "), Some(Domain::Aranceles));
        assert_eq!(Domain::parse("otra"), None);
        assert!(Domain::Oferta.is_program_domain());
        assert!(!Domain::Becas.is_program_domain());
    }
}
