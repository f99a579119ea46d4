//! Error types for the membership engine

use std::fmt;
use thiserror::Error;

use crate::domain::Level;
use crate::invariants::InvariantViolation;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite, in-memory map)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Unique constraint or concurrent writer collision; retryable
    Conflict,
    /// Mutation targets a node the store does not hold
    NodeNotFound,
    /// Lock poisoned or unavailable
    Lock,
    /// Transaction errors
    Transaction,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NodeNotFound => "node_not_found",
            ErrorKind::Lock => "lock",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by an OrgGraph store.
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn node_not_found(level: Level, id: &str) -> Self {
        Self::new(
            ErrorKind::NodeNotFound,
            format!("{} {} not found in store", level, id),
        )
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lock, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    /// Whether repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Conflict | ErrorKind::Lock)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Rejection or failure of a coordinator operation.
///
/// Everything except `Storage` and `Invariant` is detected before any
/// mutation is computed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{level} {id} not found")]
    NotFound { level: Level, id: String },

    #[error("{level} {id} is inactive")]
    InactiveAncestor { level: Level, id: String },

    #[error("scope conflict: {0}")]
    ScopeConflict(String),

    #[error("{level} {id} is already inactive")]
    AlreadyInactive { level: Level, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invariant violated after write: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn not_found(level: Level, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            level,
            id: id.into(),
        }
    }

    pub fn inactive(level: Level, id: impl Into<String>) -> Self {
        EngineError::InactiveAncestor {
            level,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for the API layer.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::InactiveAncestor { .. } => "inactive_ancestor",
            EngineError::ScopeConflict(_) => "scope_conflict",
            EngineError::AlreadyInactive { .. } => "already_inactive",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Invariant(_) => "invariant_violation",
            EngineError::Storage(_) => "storage_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_retryable())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::conflict("duplicate code");
        assert_eq!(format!("{}", err), "[conflict] duplicate code");
        assert!(err.is_retryable());
        assert!(!StorageError::database("disk").is_retryable());
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "db file missing");
        let err = StorageError::database("open failed").with_source(io_err);
        let source = err.source().unwrap();
        assert!(source.to_string().contains("db file missing"));
    }

    #[test]
    fn test_engine_error_reasons() {
        assert_eq!(EngineError::not_found(Level::Pastor, "p1").reason(), "not_found");
        assert_eq!(EngineError::inactive(Level::Pastor, "p1").reason(), "inactive_ancestor");
        assert_eq!(EngineError::ScopeConflict("x".into()).reason(), "scope_conflict");
        let err: EngineError = StorageError::conflict("race").into();
        assert_eq!(err.reason(), "storage_error");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::AlreadyInactive {
            level: Level::Supervisor,
            id: "sv1".into(),
        };
        assert_eq!(err.to_string(), "supervisor sv1 is already inactive");
    }
}
