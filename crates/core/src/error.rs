use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("failed to read source {path:?}: {reason}")]
    SourceRead { path: PathBuf, reason: String },
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
    #[error("source directory {0:?} does not exist")]
    MissingSourceDir(PathBuf),
    #[error("invalid file pattern: {0}")]
    Pattern(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

