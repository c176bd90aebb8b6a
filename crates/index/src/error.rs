use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("index returned {status} on {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("collection {0:?} does not exist")]
    MissingCollection(String),
    #[error("vector has {got} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid api key header: {0}")]
    Header(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
