/// Membership Engine: Invariant Checks
///
/// Whole-graph audit. Returns the first violation found, checks run in
/// the order listed in `audit_graph`. Used after writes when
/// `EngineOptions::audit_after_write` is set, by snapshot verification,
/// and by the audit binary.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::{Level, Node, Slot};
use crate::error::StorageError;
use crate::hashing::collect_nodes;
use crate::ids::validate_node_id;
use crate::store::GraphRead;

#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("[INVARIANT:{rule}] {message}")]
    Broken { rule: &'static str, message: String },

    #[error("[INVARIANT:read] {0}")]
    Read(#[from] StorageError),
}

impl InvariantViolation {
    fn broken(rule: &'static str, message: String) -> Self {
        InvariantViolation::Broken { rule, message }
    }

    /// Rule tag of a broken invariant, `read` when the graph could not
    /// be loaded.
    pub fn rule(&self) -> &'static str {
        match self {
            InvariantViolation::Broken { rule, .. } => rule,
            InvariantViolation::Read(_) => "read",
        }
    }
}

type Check = std::result::Result<(), InvariantViolation>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Audit every node a store holds.
pub fn audit_graph<R: GraphRead + ?Sized>(read: &R) -> Check {
    let nodes = collect_nodes(read)?;
    audit_nodes(&nodes)
}

/// Audit an already loaded node set.
pub fn audit_nodes(nodes: &[Node]) -> Check {
    let index: BTreeMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    check_unique_ids(nodes, &index)?;
    for node in nodes {
        check_id_format(node)?;
        check_carried_slots(node)?;
        if !node.is_active() {
            continue;
        }
        check_superior_active(node, &index)?;
        check_chain_consistency(node, &index)?;
        check_ancestor_agreement(node, &index)?;
        check_grouping_link(node, &index)?;
    }
    check_unique_numbers(nodes)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Individual checks (private)
// ---------------------------------------------------------------------------

fn check_unique_ids(nodes: &[Node], index: &BTreeMap<&str, &Node>) -> Check {
    if index.len() != nodes.len() {
        return Err(InvariantViolation::broken(
            "duplicate_id",
            format!("{} nodes share {} ids", nodes.len(), index.len()),
        ));
    }
    Ok(())
}

fn check_id_format(node: &Node) -> Check {
    validate_node_id(&node.id)
        .map_err(|e| InvariantViolation::broken("id_format", e.to_string()))
}

fn check_carried_slots(node: &Node) -> Check {
    for slot in Slot::ALL {
        if node.links.get(slot).is_some() && !node.level.carries(slot) {
            return Err(InvariantViolation::broken(
                "carried_slots",
                format!("{} {} holds a {} slot", node.level, node.id, slot),
            ));
        }
    }
    Ok(())
}

/// Every slot on an active node names an existing node of the right
/// level, and hierarchy references point at active nodes.
fn check_superior_active(node: &Node, index: &BTreeMap<&str, &Node>) -> Check {
    for slot in node.level.carried_slots() {
        let Some(id) = node.links.get(*slot) else {
            continue;
        };
        let target = index.get(id).filter(|t| t.level == slot.target_level());
        match target {
            None => {
                return Err(InvariantViolation::broken(
                    "dangling_reference",
                    format!("{} {} {} slot names missing {}", node.level, node.id, slot, id),
                ))
            }
            Some(t) if !t.is_active() => {
                return Err(InvariantViolation::broken(
                    "inactive_reference",
                    format!("{} {} still references inactive {} {}", node.level, node.id, slot, id),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// A node agrees with its direct superior on every inherited slot.
fn check_chain_consistency(node: &Node, index: &BTreeMap<&str, &Node>) -> Check {
    if node.level == Level::Church {
        return Ok(());
    }
    let Some(superior) = node.superior_id().and_then(|id| index.get(id)) else {
        return Ok(());
    };
    for slot in node.level.inherited_slots() {
        if node.links.get(*slot) != superior.links.get(*slot) {
            return Err(InvariantViolation::broken(
                "chain_consistency",
                format!(
                    "{} {} has {} {:?} but its superior {} has {:?}",
                    node.level,
                    node.id,
                    slot,
                    node.links.get(*slot),
                    superior.id,
                    superior.links.get(*slot)
                ),
            ));
        }
    }
    Ok(())
}

/// Every person-level ancestor a node names agrees with the node on the
/// slots above that ancestor, whether or not the direct superior link
/// is still set. Empty slots on either side are detachments, not
/// disagreements. Scope slots anchor groupings and are not compared.
fn check_ancestor_agreement(node: &Node, index: &BTreeMap<&str, &Node>) -> Check {
    if node.level == Level::Church {
        return Ok(());
    }
    for slot in node.level.carried_slots() {
        let Some(ancestor) = node.links.get(*slot).and_then(|id| index.get(id)) else {
            continue;
        };
        if !ancestor.level.has_person() || ancestor.level != slot.target_level() {
            continue;
        }
        let above = ancestor
            .level
            .inherited_slots()
            .iter()
            .copied()
            .chain(std::iter::once(ancestor.level.superior_slot()));
        for upper in above {
            if !node.level.carries(upper) || node.level.scope_slot() == Some(upper) {
                continue;
            }
            if let (Some(mine), Some(theirs)) = (node.links.get(upper), ancestor.links.get(upper)) {
                if mine != theirs {
                    return Err(InvariantViolation::broken(
                        "ancestor_chain",
                        format!(
                            "{} {} has {} {} but its {} {} has {}",
                            node.level, node.id, upper, mine, slot, ancestor.id, theirs
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Grouping links agree in both directions, and a grouping sits in the
/// same scope as its responsible node.
fn check_grouping_link(node: &Node, index: &BTreeMap<&str, &Node>) -> Check {
    if let Some(link) = node.level.grouping_link() {
        if let Some(gid) = node.links.get(link) {
            let led = index.get(gid).map_or(false, |g| g.superior_id() == Some(node.id.as_str()));
            if !led {
                return Err(InvariantViolation::broken(
                    "grouping_link",
                    format!("{} {} links {} {} which it does not lead", node.level, node.id, link, gid),
                ));
            }
        }
    }

    if node.level.is_grouping() {
        let responsible = node.superior_id().and_then(|id| index.get(id));
        if let Some(r) = responsible {
            let link = r.level.grouping_link();
            if link.and_then(|l| r.links.get(l)) != Some(node.id.as_str()) {
                return Err(InvariantViolation::broken(
                    "grouping_link",
                    format!("{} {} leads {} {} without linking it", r.level, r.id, node.level, node.id),
                ));
            }
            if let Some(scope) = node.level.scope_slot() {
                if node.links.get(scope) != r.links.get(scope) {
                    return Err(InvariantViolation::broken(
                        "grouping_scope",
                        format!(
                            "{} {} is in {} {:?} but {} {} is in {:?}",
                            node.level,
                            node.id,
                            scope,
                            node.links.get(scope),
                            r.level,
                            r.id,
                            r.links.get(scope)
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_unique_numbers(nodes: &[Node]) -> Check {
    let mut seen: BTreeMap<(Level, String, u32), &str> = BTreeMap::new();
    for node in nodes {
        let Some(alloc) = &node.allocation else {
            continue;
        };
        let key = (node.level, alloc.scope.as_key(), alloc.number);
        if let Some(other) = seen.insert(key, node.id.as_str()) {
            return Err(InvariantViolation::broken(
                "unique_code",
                format!(
                    "{} {} and {} share number {} in {}",
                    node.level,
                    other,
                    node.id,
                    alloc.number,
                    alloc.scope.as_key()
                ),
            ));
        }
    }
    Ok(())
}
