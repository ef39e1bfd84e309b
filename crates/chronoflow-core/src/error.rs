use thiserror::Error;

/// Canonical result for every query-facing API.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of a query.
///
/// Planner failures never start a query; execution failures finish every
/// downstream transformation with the same error and are returned by the
/// result iterator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("unknown procedure kind {0:?}")]
    UnknownProcedure(String),

    #[error("push down conflict: {0}")]
    PushDownConflict(String),

    #[error("incompatible predicate type: {0}")]
    IncompatiblePredicateType(String),

    #[error("incompatible types: {0}")]
    IncompatibleTypes(String),

    #[error("unsupported aggregate type: {0}")]
    UnsupportedAggregateType(String),

    #[error("storage read failed: {0}")]
    StorageRead(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("query canceled")]
    Canceled,

    #[error("incompatible common value for column {label:?}: have {existing:?}, got {new:?}")]
    IncompatibleCommonValue {
        label: String,
        existing: String,
        new: String,
    },

    #[error("expression evaluation failed: {0}")]
    ExpressionEvaluation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short stable name, used as a metric/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ParseError(_) => "parse_error",
            Error::InvalidSpec(_) => "invalid_spec",
            Error::UnknownProcedure(_) => "unknown_procedure",
            Error::PushDownConflict(_) => "push_down_conflict",
            Error::IncompatiblePredicateType(_) => "incompatible_predicate_type",
            Error::IncompatibleTypes(_) => "incompatible_types",
            Error::UnsupportedAggregateType(_) => "unsupported_aggregate_type",
            Error::StorageRead(_) => "storage_read",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::Canceled => "canceled",
            Error::IncompatibleCommonValue { .. } => "incompatible_common_value",
            Error::ExpressionEvaluation(_) => "expression_evaluation",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(e.to_string())
    }
}
