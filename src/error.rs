//! Error types for pgts.

use thiserror::Error;

use crate::types::Datatype;

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Pool creation or connection acquisition failed (including acquire timeout).
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    /// The engine rejected a query, exec or batch statement.
    #[error("Execution error: {0}")]
    Execution(#[source] sqlx::Error),

    /// Source and destination arity disagree.
    #[error("Shape mismatch: expected {expected} values, found {found}")]
    Shape { expected: usize, found: usize },

    /// A value cannot be represented under the column's datatype.
    #[error("Type mismatch on '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: Datatype,
        found: String,
    },

    /// An expected row is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine returned a column type with no datatype mapping.
    #[error("Unsupported column type: '{0}'")]
    UnsupportedType(String),

    /// The server lacks a capability the operation needs.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Malformed caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Create an invalid input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a type mismatch error for `column`.
    pub fn mismatch(
        column: impl Into<String>,
        expected: Datatype,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected,
            found: found.into(),
        }
    }

    /// True when the failure came from the pool rather than the engine.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Connection(e),
            other => Self::Execution(other),
        }
    }
}

/// Result type alias for driver operations.
pub type DbResult<T> = Result<T, DbError>;
