//! OrgGraph Store contract.
//!
//! The engine is written against these traits only. A store offers
//! indexed reads, an atomic batch write, and a transaction scope in which
//! every read of one coordinator call observes that call's own snapshot.
//!
//! Implementations:
//! - `memory::InMemoryGraphStore`: clone-on-begin, swap-on-commit
//! - `membership_runtime::sqlite_store::SqliteGraphStore`: SQLite

use serde::{Deserialize, Serialize};

use crate::domain::{Allocation, AuditStamp, Level, Node, Profile, RecordStatus, ScopeKey, Slot};
use crate::error::{EngineError, StorageError};

/// Read side of the store. All listings return nodes ordered by id.
pub trait GraphRead {
    fn get_by_id(&self, level: Level, id: &str) -> Result<Option<Node>, StorageError>;

    fn list_by_level(&self, level: Level) -> Result<Vec<Node>, StorageError>;

    /// Nodes of `level` whose `slot` holds `id`.
    fn list_by_slot(&self, level: Level, slot: Slot, id: &str) -> Result<Vec<Node>, StorageError>;

    /// Nodes of `level` allocated within `scope`, active and inactive.
    fn list_by_scope(&self, level: Level, scope: &ScopeKey) -> Result<Vec<Node>, StorageError>;

    /// Nodes of `level` whose direct superior is `superior_id`.
    fn list_by_direct_superior(&self, level: Level, superior_id: &str) -> Result<Vec<Node>, StorageError> {
        self.list_by_slot(level, level.superior_slot(), superior_id)
    }
}

/// A store transaction: reads plus the atomic batch write.
pub trait GraphTxn: GraphRead {
    /// Apply every op of the batch in order. Either all ops land when the
    /// surrounding transaction commits, or none do.
    fn apply_mutations(&mut self, batch: &MutationBatch) -> Result<(), StorageError>;
}

/// A store that can run a unit of work in one transaction.
pub trait GraphStore {
    /// Run `work` inside one transaction. Commits when it returns `Ok`,
    /// rolls back on any `Err`.
    fn with_transaction<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut dyn GraphTxn) -> Result<T, EngineError>;
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// One field assignment on an existing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldChange {
    Slot { slot: Slot, value: Option<String> },
    Status { status: RecordStatus },
    Allocation { allocation: Allocation },
    Profile { profile: Profile },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    Insert { node: Node },
    Update { level: Level, id: String, changes: Vec<FieldChange> },
}

impl MutationOp {
    pub fn target(&self) -> (Level, &str) {
        match self {
            MutationOp::Insert { node } => (node.level, node.id.as_str()),
            MutationOp::Update { level, id, .. } => (*level, id.as_str()),
        }
    }

    /// Slot assignments carried by this op, empty for inserts.
    pub fn slot_changes(&self) -> Vec<(Slot, Option<&str>)> {
        match self {
            MutationOp::Insert { .. } => Vec::new(),
            MutationOp::Update { changes, .. } => changes
                .iter()
                .filter_map(|c| match c {
                    FieldChange::Slot { slot, value } => Some((*slot, value.as_deref())),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Ordered ops plus the stamp every update is recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    pub stamp: AuditStamp,
    pub ops: Vec<MutationOp>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Apply one update's changes to an in-memory node. Shared by stores
/// that materialize nodes before writing them back.
pub fn apply_changes(node: &mut Node, changes: &[FieldChange], stamp: &AuditStamp) {
    for change in changes {
        match change {
            FieldChange::Slot { slot, value } => node.links.set(*slot, value.clone()),
            FieldChange::Status { status } => node.status = *status,
            FieldChange::Allocation { allocation } => node.allocation = Some(allocation.clone()),
            FieldChange::Profile { profile } => node.profile = profile.clone(),
        }
    }
    node.updated = Some(stamp.clone());
}
