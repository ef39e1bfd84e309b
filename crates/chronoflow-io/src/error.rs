use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("database not found: {0}")]
    UnknownDatabase(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<StorageError> for chronoflow_core::Error {
    fn from(e: StorageError) -> Self {
        chronoflow_core::Error::StorageRead(e.to_string())
    }
}
