/// Membership Engine: Graph Queries
///
/// Read-only views over a store: attachment state, the list of nodes
/// needing manual reassignment, and subtree traversal.

use std::collections::{BTreeSet, VecDeque};

use crate::domain::{Attachment, Level, Links, Node};
use crate::error::StorageError;
use crate::store::GraphRead;

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Attachment of a node of `level` holding `links`.
///
/// A node is partially detached when its direct superior is missing or
/// any inherited leadership slot is empty. Grouping membership of
/// hierarchy nodes is not part of attachment, but a grouping without its
/// scope anchor (a zone without church, a family group without zone) is
/// detached. Churches are roots and always attached.
pub fn attachment(level: Level, links: &Links) -> Attachment {
    if level == Level::Church {
        return Attachment::FullyAttached;
    }
    let superior_missing = links.get(level.superior_slot()).is_none();
    let chain_gap = level
        .inherited_slots()
        .iter()
        .filter(|s| s.is_hierarchy())
        .any(|s| links.get(*s).is_none());
    let scope_gap = level.scope_slot().map_or(false, |s| links.get(s).is_none());

    if superior_missing || chain_gap || scope_gap {
        Attachment::PartiallyDetached
    } else {
        Attachment::FullyAttached
    }
}

pub fn attachment_of(node: &Node) -> Attachment {
    attachment(node.level, &node.links)
}

/// Active nodes of every level that are partially detached, in level
/// order then id order.
pub fn find_detached<R: GraphRead + ?Sized>(read: &R) -> Result<Vec<Node>, StorageError> {
    let mut out = Vec::new();
    for level in Level::ALL {
        out.extend(
            read.list_by_level(level)?
                .into_iter()
                .filter(|n| n.is_active() && attachment_of(n) == Attachment::PartiallyDetached),
        );
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Every node below `root`: hierarchy subordinates plus the groupings
/// they lead, breadth first. Inactive nodes are included.
pub fn descendants<R: GraphRead + ?Sized>(read: &R, root: &Node) -> Result<Vec<Node>, StorageError> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    seen.insert(root.id.clone());
    let mut queue: VecDeque<Node> = VecDeque::new();
    queue.push_back(root.clone());
    let mut out = Vec::new();

    while let Some(node) = queue.pop_front() {
        let mut below: Vec<Level> = node.level.child_levels().to_vec();
        below.extend(node.level.led_grouping());
        for level in below {
            for child in read.list_by_direct_superior(level, &node.id)? {
                if seen.insert(child.id.clone()) {
                    out.push(child.clone());
                    queue.push_back(child);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Slot;

    fn links(slots: &[Slot]) -> Links {
        let mut l = Links::default();
        for s in slots {
            l.set(*s, Some(format!("{}-1", s)));
        }
        l
    }

    #[test]
    fn test_church_is_always_attached() {
        assert_eq!(attachment(Level::Church, &Links::default()), Attachment::FullyAttached);
    }

    #[test]
    fn test_missing_inherited_slot_detaches() {
        let full = links(&[Slot::Church, Slot::Pastor, Slot::Copastor]);
        assert_eq!(attachment(Level::Supervisor, &full), Attachment::FullyAttached);
        let gap = links(&[Slot::Church, Slot::Copastor]);
        assert_eq!(attachment(Level::Supervisor, &gap), Attachment::PartiallyDetached);
    }

    #[test]
    fn test_missing_zone_does_not_detach_preacher() {
        let l = links(&[Slot::Church, Slot::Pastor, Slot::Copastor, Slot::Supervisor]);
        assert_eq!(attachment(Level::Preacher, &l), Attachment::FullyAttached);
    }

    #[test]
    fn test_family_group_without_zone_is_detached() {
        let l = links(&[Slot::Church, Slot::Pastor, Slot::Copastor, Slot::Supervisor, Slot::Preacher]);
        assert_eq!(attachment(Level::FamilyGroup, &l), Attachment::PartiallyDetached);
    }
}
