use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CognitiveError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl From<validator::ValidationErrors> for CognitiveError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CognitiveError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CognitiveError>;
