//! Error types for the membership runtime

use thiserror::Error;

use membership_engine::{EngineError, StorageError};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot {sequence} failed verification: stored {stored}, computed {computed}")]
    CorruptSnapshot {
        sequence: u64,
        stored: String,
        computed: String,
    },

    #[error("Determinism failure: run 1 {first}, run 2 {second}")]
    Determinism { first: String, second: String },
}

impl From<toml::de::Error> for RuntimeError {
    fn from(err: toml::de::Error) -> Self {
        RuntimeError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
