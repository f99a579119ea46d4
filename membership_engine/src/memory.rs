//! In-memory OrgGraph store.
//!
//! A transaction works on a clone of the committed map; commit swaps the
//! clone in, rollback drops it. The lock is held for the whole unit of
//! work, so calls are serialized the same way an immediate SQLite
//! transaction serializes them.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::domain::{Level, Node, ScopeKey, Slot};
use crate::error::{EngineError, StorageError};
use crate::store::{apply_changes, GraphRead, GraphStore, GraphTxn, MutationBatch, MutationOp};

/// Map-backed store for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing nodes, bypassing the engine.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let map = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            nodes: Mutex::new(map),
        }
    }

    /// Committed nodes, ordered by id.
    pub fn nodes(&self) -> Result<Vec<Node>, StorageError> {
        let guard = self
            .nodes
            .lock()
            .map_err(|_| StorageError::lock("in-memory store lock poisoned"))?;
        Ok(guard.values().cloned().collect())
    }
}

impl GraphStore for InMemoryGraphStore {
    fn with_transaction<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut dyn GraphTxn) -> Result<T, EngineError>,
    {
        let mut guard = self
            .nodes
            .lock()
            .map_err(|_| StorageError::lock("in-memory store lock poisoned"))?;
        let mut txn = MemoryTxn {
            nodes: guard.clone(),
        };
        let out = work(&mut txn)?;
        *guard = txn.nodes;
        Ok(out)
    }
}

/// Working copy of one transaction. Also usable on its own as a
/// read-only snapshot of a graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryTxn {
    nodes: BTreeMap<String, Node>,
}

impl MemoryTxn {
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    fn filtered(&self, keep: impl Fn(&Node) -> bool) -> Vec<Node> {
        self.nodes.values().filter(|n| keep(n)).cloned().collect()
    }

    fn insert(&mut self, node: &Node) -> Result<(), StorageError> {
        if self.nodes.contains_key(&node.id) {
            return Err(StorageError::conflict(format!(
                "node id {} already exists",
                node.id
            )));
        }
        if let Some(alloc) = &node.allocation {
            let taken = self.nodes.values().any(|n| {
                n.level == node.level
                    && n.allocation
                        .as_ref()
                        .map_or(false, |a| a.scope == alloc.scope && a.number == alloc.number)
            });
            if taken {
                return Err(StorageError::conflict(format!(
                    "{} number {} already allocated in {}",
                    node.level,
                    alloc.number,
                    alloc.scope.as_key()
                )));
            }
        }
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }
}

impl GraphRead for MemoryTxn {
    fn get_by_id(&self, level: Level, id: &str) -> Result<Option<Node>, StorageError> {
        Ok(self.nodes.get(id).filter(|n| n.level == level).cloned())
    }

    fn list_by_level(&self, level: Level) -> Result<Vec<Node>, StorageError> {
        Ok(self.filtered(|n| n.level == level))
    }

    fn list_by_slot(&self, level: Level, slot: Slot, id: &str) -> Result<Vec<Node>, StorageError> {
        Ok(self.filtered(|n| n.level == level && n.links.get(slot) == Some(id)))
    }

    fn list_by_scope(&self, level: Level, scope: &ScopeKey) -> Result<Vec<Node>, StorageError> {
        Ok(self.filtered(|n| {
            n.level == level && n.allocation.as_ref().map_or(false, |a| &a.scope == scope)
        }))
    }
}

impl GraphTxn for MemoryTxn {
    fn apply_mutations(&mut self, batch: &MutationBatch) -> Result<(), StorageError> {
        for op in &batch.ops {
            match op {
                MutationOp::Insert { node } => self.insert(node)?,
                MutationOp::Update { level, id, changes } => {
                    let node = self
                        .nodes
                        .get_mut(id)
                        .filter(|n| n.level == *level)
                        .ok_or_else(|| StorageError::node_not_found(*level, id))?;
                    apply_changes(node, changes, &batch.stamp);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditStamp, Links, Profile, RecordStatus, ZoneProfile};
    use crate::store::FieldChange;

    fn zone(id: &str) -> Node {
        Node {
            id: id.to_string(),
            level: Level::Zone,
            status: RecordStatus::Active,
            links: Links::default(),
            profile: Profile::Zone(ZoneProfile {
                name: "North".into(),
                district: "Lima".into(),
            }),
            allocation: None,
            created: AuditStamp::now("test"),
            updated: None,
        }
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = InMemoryGraphStore::new();
        let result: Result<(), EngineError> = store.with_transaction(|txn| {
            txn.apply_mutations(&MutationBatch {
                stamp: AuditStamp::now("test"),
                ops: vec![MutationOp::Insert { node: zone("z1") }],
            })?;
            Err(EngineError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.nodes().unwrap().is_empty());
    }

    #[test]
    fn test_commit_keeps_writes_and_stamps_updates() {
        let store = InMemoryGraphStore::from_nodes(vec![zone("z1")]);
        store
            .with_transaction(|txn| {
                txn.apply_mutations(&MutationBatch {
                    stamp: AuditStamp::now("clerk"),
                    ops: vec![MutationOp::Update {
                        level: Level::Zone,
                        id: "z1".into(),
                        changes: vec![FieldChange::Status {
                            status: RecordStatus::Inactive,
                        }],
                    }],
                })?;
                Ok(())
            })
            .unwrap();
        let nodes = store.nodes().unwrap();
        assert_eq!(nodes[0].status, RecordStatus::Inactive);
        assert_eq!(nodes[0].updated.as_ref().unwrap().by, "clerk");
    }

    #[test]
    fn test_update_of_missing_node_fails() {
        let mut txn = MemoryTxn::default();
        let err = txn
            .apply_mutations(&MutationBatch {
                stamp: AuditStamp::now("t"),
                ops: vec![MutationOp::Update {
                    level: Level::Zone,
                    id: "nope".into(),
                    changes: vec![],
                }],
            })
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NodeNotFound);
    }

    #[test]
    fn test_get_by_id_checks_level() {
        let txn = MemoryTxn::from_nodes(vec![zone("z1")]);
        assert!(txn.get_by_id(Level::Zone, "z1").unwrap().is_some());
        assert!(txn.get_by_id(Level::Pastor, "z1").unwrap().is_none());
    }
}
