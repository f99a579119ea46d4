/// Membership Engine: Canonical Hashing
///
/// Deterministic serialization of a whole graph plus its SHA-256.
/// Two graphs hash equal exactly when they hold the same nodes with the
/// same levels, statuses, links, codes and profiles. Audit stamps are
/// excluded so replaying the same commands at another time hashes equal.
///
/// Rules:
///   - Nodes sorted by (level, id)
///   - Links written as all seven slots in fixed order, null when empty
///   - UTF-8 JSON, no whitespace

use sha2::{Digest, Sha256};
use serde_json::{Map, Value};

use crate::domain::{Level, Node, Slot};
use crate::error::StorageError;
use crate::store::GraphRead;
use crate::ENGINE_VERSION;

/// Canonical serialization of `nodes` to UTF-8 JSON bytes.
pub fn canonical_serialize(nodes: &[Node]) -> Result<Vec<u8>, StorageError> {
    let value = build_canonical_value(nodes)?;
    Ok(serde_json::to_string(&value)?.into_bytes())
}

/// SHA-256 of the canonical serialization. Lowercase hex string.
pub fn canonical_hash(nodes: &[Node]) -> Result<String, StorageError> {
    let bytes = canonical_serialize(nodes)?;
    Ok(hex_digest(&bytes))
}

/// Canonical hash of every node a store holds.
pub fn graph_hash<R: GraphRead + ?Sized>(read: &R) -> Result<String, StorageError> {
    canonical_hash(&collect_nodes(read)?)
}

/// Every node of every level, in canonical order.
pub fn collect_nodes<R: GraphRead + ?Sized>(read: &R) -> Result<Vec<Node>, StorageError> {
    let mut nodes = Vec::new();
    for level in Level::ALL {
        nodes.extend(read.list_by_level(level)?);
    }
    sort_canonical(&mut nodes);
    Ok(nodes)
}

pub fn sort_canonical(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));
}

pub fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

/// Field order: engine_version, nodes. Per node: id, level, status,
/// links, allocation, profile.
fn build_canonical_value(nodes: &[Node]) -> Result<Value, StorageError> {
    let mut sorted = nodes.to_vec();
    sort_canonical(&mut sorted);

    let mut list = Vec::with_capacity(sorted.len());
    for node in &sorted {
        let mut links = Map::new();
        for slot in Slot::ALL {
            let v = node
                .links
                .get(slot)
                .map_or(Value::Null, |id| Value::String(id.to_string()));
            links.insert(slot.as_str().to_string(), v);
        }

        let allocation = match &node.allocation {
            Some(a) => {
                let mut m = Map::new();
                m.insert("scope".to_string(), Value::String(a.scope.as_key()));
                m.insert("number".to_string(), Value::Number(a.number.into()));
                m.insert("code".to_string(), Value::String(a.code.clone()));
                Value::Object(m)
            }
            None => Value::Null,
        };

        let mut m = Map::new();
        m.insert("id".to_string(), Value::String(node.id.clone()));
        m.insert("level".to_string(), Value::String(node.level.as_str().to_string()));
        m.insert("status".to_string(), Value::String(node.status.as_str().to_string()));
        m.insert("links".to_string(), Value::Object(links));
        m.insert("allocation".to_string(), allocation);
        m.insert("profile".to_string(), serde_json::to_value(&node.profile)?);
        list.push(Value::Object(m));
    }

    // engine_version first, part of the hash identity.
    let mut root = Map::new();
    root.insert(
        "engine_version".to_string(),
        Value::Number(ENGINE_VERSION.into()),
    );
    root.insert("nodes".to_string(), Value::Array(list));
    Ok(Value::Object(root))
}
