//! Drift detection: determinism verification and graph comparison.

use std::collections::BTreeMap;

use serde::Serialize;

use membership_engine::graph::attachment_of;
use membership_engine::hashing::canonical_hash;
use membership_engine::{Attachment, Command, Coordinator, EngineOptions, InMemoryGraphStore, Node};

use crate::error::{Result, RuntimeError};

/// Replay `commands` into a fresh in-memory store and return the
/// canonical hash of the result.
pub fn replay_hash(commands: &[Command]) -> Result<String> {
    let engine = Coordinator::with_options(
        InMemoryGraphStore::new(),
        EngineOptions {
            actor: "replay".to_string(),
            audit_after_write: true,
        },
    );
    for command in commands {
        engine.execute(command.clone())?;
    }
    Ok(canonical_hash(&engine.store().nodes()?)?)
}

/// Replay the same commands twice and require identical hashes. Node
/// ids must be supplied by the commands for this to hold.
pub fn verify_determinism(commands: &[Command]) -> Result<String> {
    let first = replay_hash(commands)?;
    let second = replay_hash(commands)?;
    if first != second {
        return Err(RuntimeError::Determinism { first, second });
    }
    Ok(first)
}

/// Structured comparison between two node sets, `a` before `b`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub node_count_a: i64,
    pub node_count_b: i64,
    pub node_count_delta: i64,
    pub active_a: i64,
    pub active_b: i64,
    pub active_delta: i64,
    pub detached_a: i64,
    pub detached_b: i64,
    pub detached_delta: i64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub inactivated: Vec<String>,
    /// Active in both, with different links.
    pub relinked: Vec<String>,
    pub newly_detached: Vec<String>,
    pub reattached: Vec<String>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.inactivated.is_empty()
            && self.relinked.is_empty()
    }
}

fn detached(node: &Node) -> bool {
    node.is_active() && attachment_of(node) == Attachment::PartiallyDetached
}

fn count(nodes: &[Node], keep: fn(&Node) -> bool) -> i64 {
    nodes.iter().filter(|n| keep(n)).count() as i64
}

fn active(node: &Node) -> bool {
    node.is_active()
}

pub fn compare_graphs(a: &[Node], b: &[Node]) -> DriftReport {
    let by_id_a: BTreeMap<&str, &Node> = a.iter().map(|n| (n.id.as_str(), n)).collect();
    let by_id_b: BTreeMap<&str, &Node> = b.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut report = DriftReport::default();
    for (id, nb) in &by_id_b {
        let Some(na) = by_id_a.get(id) else {
            report.added.push(id.to_string());
            continue;
        };
        if na.is_active() && !nb.is_active() {
            report.inactivated.push(id.to_string());
        }
        if na.is_active() && nb.is_active() && na.links != nb.links {
            report.relinked.push(id.to_string());
        }
        match (detached(na), detached(nb)) {
            (false, true) => report.newly_detached.push(id.to_string()),
            (true, false) if nb.is_active() => report.reattached.push(id.to_string()),
            _ => {}
        }
    }
    report.removed = by_id_a
        .keys()
        .filter(|id| !by_id_b.contains_key(*id))
        .map(|id| id.to_string())
        .collect();

    report.node_count_a = a.len() as i64;
    report.node_count_b = b.len() as i64;
    report.node_count_delta = report.node_count_b - report.node_count_a;
    report.active_a = count(a, active);
    report.active_b = count(b, active);
    report.active_delta = report.active_b - report.active_a;
    report.detached_a = count(a, detached);
    report.detached_b = count(b, detached);
    report.detached_delta = report.detached_b - report.detached_a;
    report
}
