mod aliases;
mod classify;
mod embedding;
mod error;
mod money;
mod normalizer;
mod record;
mod schema;
mod tabular;

pub use aliases::{fields, AliasTable, SchemaMap, SCHEMA_MAP_FILE};
pub use classify::{classify, domain_from_columns, domain_from_name, DomainRule, COLUMN_RULES, NAME_RULES};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{CoreError, Result};
pub use money::{parse_amount, parse_count, parse_flag, round2};
pub use normalizer::{normalize, Normalizer};
pub use record::{keys, Domain, NumberValue, Record, RecordMetadata};
pub use schema::{
    find_year, fold, hash_str, make_chunk_id, make_doc_id, normalize_source_path, now_iso_utc,
    primary_key, slugify, slugify_column, GENERAL, SCHEMA_VERSION,
};
pub use tabular::{list_data_files, read_sheets, Sheet, SourceFormat, DATA_FILE_PATTERN};
