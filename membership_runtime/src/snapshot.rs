//! Snapshot layer: point-in-time copies of the whole graph.
//!
//! A snapshot holds every node plus the canonical hash of that node set.
//! The hash ignores audit stamps, so two snapshots of the same graph
//! taken at different times hash equal.
//!
//! Files are named `snapshot_{sequence:06}.json`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use membership_engine::hashing::{canonical_hash, sort_canonical};
use membership_engine::invariants::audit_nodes;
use membership_engine::{Node, ENGINE_VERSION};

use crate::error::{Result, RuntimeError};

/// Snapshot on-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of commands applied when the snapshot was taken.
    pub sequence: u64,
    /// Engine version at snapshot time.
    pub engine_version: u32,
    /// Canonical hash of `nodes`.
    pub hash: String,
    pub nodes: Vec<Node>,
}

fn file_name(sequence: u64) -> String {
    format!("snapshot_{:06}.json", sequence)
}

/// Save a snapshot of `nodes` taken at `sequence`.
pub fn save_snapshot(dir: &Path, sequence: u64, nodes: &[Node]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let mut nodes = nodes.to_vec();
    sort_canonical(&mut nodes);
    let snap = Snapshot {
        sequence,
        engine_version: ENGINE_VERSION,
        hash: canonical_hash(&nodes)?,
        nodes,
    };

    let path = dir.join(file_name(sequence));
    let content = serde_json::to_string(&snap)?;
    let mut file = File::create(&path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    info!(sequence, nodes = snap.nodes.len(), hash = %snap.hash, "snapshot saved");
    Ok(path)
}

/// Load the snapshot taken at `sequence`, if there is one.
pub fn load_snapshot(dir: &Path, sequence: u64) -> Result<Option<Snapshot>> {
    let path = dir.join(file_name(sequence));
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Highest sequence with a snapshot file in `dir`.
pub fn latest_sequence(dir: &Path) -> Result<Option<u64>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut best: Option<u64> = None;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let seq = name
            .strip_prefix("snapshot_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(seq) = seq {
            best = Some(best.map_or(seq, |b| b.max(seq)));
        }
    }
    Ok(best)
}

pub fn load_latest_snapshot(dir: &Path) -> Result<Option<Snapshot>> {
    match latest_sequence(dir)? {
        Some(seq) => load_snapshot(dir, seq),
        None => Ok(None),
    }
}

/// Check the stored hash against the nodes, then audit the nodes.
pub fn verify_snapshot(snap: &Snapshot) -> Result<()> {
    let computed = canonical_hash(&snap.nodes)?;
    if computed != snap.hash {
        return Err(RuntimeError::CorruptSnapshot {
            sequence: snap.sequence,
            stored: snap.hash.clone(),
            computed,
        });
    }
    audit_nodes(&snap.nodes).map_err(membership_engine::EngineError::from)?;
    Ok(())
}
