use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::schema::slugify;

pub const SCHEMA_MAP_FILE: &str = "_schema_map.json";

/// Canonical field names understood by the normalizer.
pub mod fields {
    pub const TITLE: &str = "titulo";
    pub const FACULTY: &str = "facultad";
    pub const PROGRAM: &str = "carrera";
    pub const PROGRAM_ID: &str = "carrera_id";
    pub const MODALITY: &str = "modalidad";
    pub const PERIOD: &str = "periodo";
    pub const LEVEL: &str = "nivel";
    pub const ALIAS: &str = "alias";

    pub const ENROLLMENT_FEE: &str = "matricula_general";
    pub const FIRST_ENROLLMENT_FEE: &str = "matricula_ingresante";
    pub const MONTHLY_FEE: &str = "arancel_mensual";
    pub const TOTAL_FEE: &str = "arancel_total";
    pub const ESTIMATED_TOTAL: &str = "arancel_total_estimado";
    pub const INSTALLMENTS: &str = "cant_cuotas_plan_pagos";
    pub const HAS_PAYMENT_PLAN: &str = "tiene_plan_pagos";
}

const BUILTIN_ALIASES: &[(&str, &[&str])] = &[
    (
        fields::FACULTY,
        &["facultad", "unidad_academica", "escuela", "departamento", "area_estudio", "área", "area"],
    ),
    (fields::PROGRAM, &["carrera", "programa", "plan", "nombre_carrera"]),
    (
        fields::MODALITY,
        &["modalidad", "cursado", "régimen", "regimen", "presencialidad", "tipo_cursado"],
    ),
    (
        fields::PERIOD,
        &[
            "periodo",
            "periodo_academico",
            "anio",
            "año",
            "anio_ingreso",
            "año_ingreso",
            "cohorte",
            "year",
            "vigencia",
            "año_lectivo",
        ],
    ),
    (fields::TITLE, &["titulo", "título", "alias", "nombre", "nombre_programa"]),
    (
        fields::PROGRAM_ID,
        &["identificador_carrera", "id_carrera", "codigo_carrera", "cod_carrera"],
    ),
    (fields::LEVEL, &["nivel", "nivel_estudio", "nivel_academico", "grado"]),
    (
        fields::ENROLLMENT_FEE,
        &[
            "matricula_general",
            "matricula",
            "matricula_gral",
            "matricula total",
            "matricula_unica",
            "matricula comun",
            "inscripcion",
            "inscripción",
        ],
    ),
    (
        fields::FIRST_ENROLLMENT_FEE,
        &["matricula_ingresante", "matricula nuevo", "matricula primer ingreso"],
    ),
    (
        fields::MONTHLY_FEE,
        &["arancel_mensual", "mensual", "cuota_mensual", "importe_mensual", "precio_mensual", "valor_mensual"],
    ),
    (
        fields::TOTAL_FEE,
        &["arancel_total", "total", "importe_total", "precio_total", "valor_total"],
    ),
    (
        fields::INSTALLMENTS,
        &["cant_cuotas_plan_pagos", "cantidad_cuotas", "cant_cuotas", "cuotas_plan_pagos"],
    ),
    (fields::HAS_PAYMENT_PLAN, &["tiene_plan_pagos", "plan_pagos"]),
];

/// Contents of the optional per-directory sidecar file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaMap {
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
}

impl SchemaMap {
    /// Reads `<dir>/_schema_map.json`; a missing or unreadable file yields an empty map.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(SCHEMA_MAP_FILE);
        if !path.is_file() {
            return Self::default();
        }
        let parsed = fs::read_to_string(&path)
            .map_err(|err| err.to_string())
            .and_then(|raw| serde_json::from_str::<SchemaMap>(&raw).map_err(|err| err.to_string()));
        match parsed {
            Ok(map) => map,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable schema map, using built-in aliases");
                Self::default()
            }
        }
    }
}

/// Column aliases per canonical field, in priority order, plus default values.
#[derive(Debug, Clone)]
pub struct AliasTable {
    fields: BTreeMap<String, Vec<String>>,
    defaults: BTreeMap<String, String>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AliasTable {
    pub fn builtin() -> Self {
        let mut fields = BTreeMap::new();
        for (field, aliases) in BUILTIN_ALIASES {
            let mut list: Vec<String> = Vec::with_capacity(aliases.len());
            for alias in aliases.iter() {
                push_unique(&mut list, slugify(alias));
            }
            fields.insert(field.to_string(), list);
        }
        Self {
            fields,
            defaults: BTreeMap::new(),
        }
    }

    /// Built-ins unioned with user aliases; user entries are appended after the
    /// built-in ones so existing priorities are kept.
    pub fn with_schema_map(map: &SchemaMap) -> Self {
        let mut table = Self::builtin();
        for (field, aliases) in &map.aliases {
            let entry = table.fields.entry(slugify(field)).or_default();
            for alias in aliases {
                push_unique(entry, slugify(alias));
            }
        }
        for (field, value) in &map.defaults {
            let rendered = match value {
                Value::Null => continue,
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            if !rendered.is_empty() {
                table.defaults.insert(slugify(field), rendered);
            }
        }
        table
    }

    pub fn for_dir(dir: &Path) -> Self {
        Self::with_schema_map(&SchemaMap::load(dir))
    }

    pub fn candidates(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn default_value(&self, field: &str) -> Option<&str> {
        self.defaults.get(field).map(String::as_str)
    }

    /// Every column name that maps onto one of `fields`.
    pub fn columns_for(&self, fields: &[&str]) -> Vec<&str> {
        fields
            .iter()
            .flat_map(|field| self.candidates(field).iter().map(String::as_str))
            .collect()
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
