#![forbid(unsafe_code)]

//! Membership runtime
//!
//! Wraps the membership engine with SQLite persistence, configuration,
//! sessions, snapshots, and drift detection.
//!
//! No hierarchy rules live here. Validation, cascades and invariants
//! are delegated to the engine.

pub mod config;
pub mod error;
pub mod logging;
pub mod schema;
pub mod sqlite_store;
pub mod session;
pub mod snapshot;
pub mod drift;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use session::{Session, SharedSession};
pub use sqlite_store::SqliteGraphStore;
