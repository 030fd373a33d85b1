//! Error types for the query engine.

use crate::query_shape::PropName;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A filter rule whose comparator the engine doesn't recognize (§7.3).
#[derive(Debug, Clone)]
pub struct UnknownFilterRule {
    pub property: String,
    pub comparator: String,
}

/// Error types for the query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Migration error
    #[cfg(feature = "migrate")]
    #[error("Migration error: {0}")]
    Migration(String),

    /// Schema is missing or malformed configuration (§7.1). Programmer
    /// error — surfaced immediately, never silently worked around.
    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    /// A query shape's leaves/joins don't agree on a single table (§7.2).
    #[error("Could not determine a single table from the subquery {0}")]
    UnresolvableTable(String),

    /// A filter rule named a comparator outside `{eq,gt,lt,gte,lte,ne,null}`
    /// (§7.3). Carries the offending rule as structured data.
    #[error("Unknown filter operation '{}' on property '{}'", .0.comparator, .0.property)]
    UnknownFilterOp(UnknownFilterRule),

    /// A sentinel-recursion branch ran past the schema's configured hard
    /// depth ceiling without converging (§7.6).
    #[error("Recursion ceiling exceeded on join '{join_prop}' (ceiling: {ceiling})")]
    RecursionCeilingExceeded { join_prop: PropName, ceiling: usize },

    /// A seed placeholder was used as an insert PK slot more than once
    /// (§7.7, §8).
    #[error("Seed placeholder '{0}' was already used as an insert PK")]
    SeedPlaceholderReuse(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Parse a tokio_postgres error into a more specific EngineError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for EngineError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(feature = "migrate")]
impl From<refinery::Error> for EngineError {
    fn from(err: refinery::Error) -> Self {
        Self::Migration(err.to_string())
    }
}
