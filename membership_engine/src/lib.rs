#![forbid(unsafe_code)]

/// Version of the canonical serialization. Bumped whenever the hash of
/// an unchanged graph would change.
pub const ENGINE_VERSION: u32 = 1;

pub mod domain;
pub mod error;
pub mod ids;
pub mod store;
pub mod memory;
pub mod validator;
pub mod allocator;
pub mod cascade;
pub mod commands;
pub mod coordinator;
pub mod graph;
pub mod invariants;
pub mod hashing;

pub use commands::{Command, Outcome};
pub use coordinator::{Coordinator, EngineOptions};
pub use domain::{Attachment, Level, Links, Node, NodeDraft, Profile, RecordStatus, ScopeKey, Slot};
pub use error::{EngineError, ErrorKind, StorageError};
pub use memory::InMemoryGraphStore;
pub use store::{GraphRead, GraphStore, GraphTxn, MutationBatch, MutationOp};
