use thiserror::Error;

/// Result type local to chronoflow-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("memory limit exceeded for '{tag}': requested {requested} bytes, limit {limit}, reserved {reserved}")]
    BudgetExceeded {
        tag: &'static str,
        requested: usize,
        limit: usize,
        reserved: usize,
    },
}

impl From<Error> for chronoflow_core::Error {
    fn from(e: Error) -> Self {
        chronoflow_core::Error::ResourceExhausted(e.to_string())
    }
}
