/// Membership Engine: Cascade Planner
///
/// Computes, without writing, the ordered mutations a single change
/// implies for the subtree below the changed node. Reads go through the
/// store; nodes the plan already touched are served from an overlay so
/// later steps see earlier ones.
///
/// Ordering rules:
/// - Grouping detachments are staged before the update of the node that
///   caused them, so no grouping is ever seen under two superiors.
/// - Parents are staged before their descendants.
/// - Inactive nodes are history and never rewritten.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{Level, Links, Node, RecordStatus, Slot};
use crate::error::Result;
use crate::store::{FieldChange, GraphRead, MutationOp};
use crate::validator::{detached_grouping_links, grouping_accepts, ResolvedChain};

/// What happened to the node a cascade starts from.
#[derive(Debug, Clone)]
pub enum ChangeKind {
    /// The node moves under the superior of the resolved chain.
    SuperiorChanged(ResolvedChain),
    /// The node is being inactivated.
    Inactivated,
}

/// Plan the full mutation list for `change` applied to `node`.
pub fn propagate<R: GraphRead + ?Sized>(read: &R, node: &Node, change: &ChangeKind) -> Result<Vec<MutationOp>> {
    let mut plan = CascadePlan::new(read);
    match change {
        ChangeKind::SuperiorChanged(chain) => {
            let links = chain.links_for(node.level, &node.links);
            plan.retarget(node, links)?;
        }
        ChangeKind::Inactivated => plan.inactivate(node)?,
    }
    Ok(plan.into_ops())
}

/// Mutation list under construction plus the overlay of staged nodes.
pub struct CascadePlan<'r, R: ?Sized> {
    read: &'r R,
    staged: BTreeMap<String, Node>,
    ops: Vec<MutationOp>,
}

impl<'r, R: GraphRead + ?Sized> CascadePlan<'r, R> {
    pub fn new(read: &'r R) -> Self {
        Self {
            read,
            staged: BTreeMap::new(),
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<MutationOp> {
        self.ops
    }

    // ── Overlay reads ──────────────────────────────────────────────

    /// A node as it stands after the ops staged so far.
    pub fn current(&self, level: Level, id: &str) -> Result<Option<Node>> {
        if let Some(node) = self.staged.get(id) {
            return Ok(Some(node.clone()).filter(|n| n.level == level));
        }
        Ok(self.read.get_by_id(level, id)?)
    }

    fn latest(&self, node: &Node) -> Node {
        self.staged.get(&node.id).cloned().unwrap_or_else(|| node.clone())
    }

    /// Active nodes of `level` whose `slot` holds `id`, overlay applied.
    pub fn holding(&self, level: Level, slot: Slot, id: &str) -> Result<Vec<Node>> {
        let keep = |n: &Node| n.level == level && n.is_active() && n.links.get(slot) == Some(id);
        let mut found: BTreeMap<String, Node> = BTreeMap::new();
        for stored in self.read.list_by_slot(level, slot, id)? {
            let node = self.latest(&stored);
            if keep(&node) {
                found.insert(node.id.clone(), node);
            }
        }
        for node in self.staged.values().filter(|n| keep(n)) {
            found.insert(node.id.clone(), node.clone());
        }
        Ok(found.into_values().collect())
    }

    /// Active direct subordinates of `superior_id` at `level`.
    pub fn children(&self, level: Level, superior_id: &str) -> Result<Vec<Node>> {
        self.holding(level, level.superior_slot(), superior_id)
    }

    // ── Staging ────────────────────────────────────────────────────

    pub fn insert(&mut self, node: Node) {
        self.staged.insert(node.id.clone(), node.clone());
        self.ops.push(MutationOp::Insert { node });
    }

    /// Stage field changes on `node`. Empty change lists are dropped.
    pub fn update(&mut self, node: &Node, changes: Vec<FieldChange>) -> Node {
        let mut next = self.latest(node);
        if changes.is_empty() {
            return next;
        }
        for change in &changes {
            match change {
                FieldChange::Slot { slot, value } => next.links.set(*slot, value.clone()),
                FieldChange::Status { status } => next.status = *status,
                FieldChange::Allocation { allocation } => next.allocation = Some(allocation.clone()),
                FieldChange::Profile { profile } => next.profile = profile.clone(),
            }
        }
        self.ops.push(MutationOp::Update {
            level: next.level,
            id: next.id.clone(),
            changes,
        });
        self.staged.insert(next.id.clone(), next.clone());
        next
    }

    /// Stage `node`'s links becoming `links`, writing only changed slots.
    pub fn update_links(&mut self, node: &Node, links: Links) -> Node {
        let current = self.latest(node);
        let changes = current
            .links
            .diff(&links)
            .into_iter()
            .map(|(slot, value)| FieldChange::Slot { slot, value })
            .collect();
        self.update(&current, changes)
    }

    // ── Cascades ───────────────────────────────────────────────────

    /// Give `node` new links and carry the result down its subtree.
    ///
    /// Groupings led by `node` either follow it (same chain, same scope)
    /// or are detached first. Hierarchy children re-inherit from the
    /// node's new links, recursively.
    pub fn retarget(&mut self, node: &Node, links: Links) -> Result<Node> {
        let node = self.latest(node);
        let mut links = links;

        if let (Some(link), Some(grouping_level)) = (node.level.grouping_link(), node.level.led_grouping()) {
            for grouping in self.children(grouping_level, &node.id)? {
                if grouping_accepts(&grouping, &links) {
                    let follow = grouping.links.inherit_from(grouping_level, &node.id, &links);
                    self.update_links(&grouping, follow);
                } else {
                    debug!(
                        grouping = %grouping.id,
                        level = %grouping_level,
                        responsible = %node.id,
                        "detaching grouping from responsible node"
                    );
                    let detached = detached_grouping_links(&grouping, &links);
                    self.update_links(&grouping, detached);
                    if links.get(link) == Some(grouping.id.as_str()) {
                        links.set(link, None);
                    }
                }
            }
        }

        let changed = node.links != links;
        let updated = self.update_links(&node, links);

        if changed {
            for child_level in node.level.child_levels() {
                for child in self.children(*child_level, &node.id)? {
                    let child_links = child.links.inherit_from(*child_level, &node.id, &updated.links);
                    self.retarget(&child, child_links)?;
                }
            }
            if node.level.has_person() {
                self.rederive_holders(&updated)?;
            }
        }
        Ok(updated)
    }

    /// Active nodes that still name `node` but were not reached through
    /// superior links (their chain was cut by an earlier inactivation)
    /// take every slot above `node` from its new links. Scope slots stay.
    fn rederive_holders(&mut self, node: &Node) -> Result<()> {
        let Some(own) = node.level.own_slot() else {
            return Ok(());
        };
        let above: Vec<Slot> = node
            .level
            .inherited_slots()
            .iter()
            .copied()
            .chain(std::iter::once(node.level.superior_slot()))
            .collect();
        for level in Level::ALL.iter().filter(|l| l.carries(own)) {
            for holder in self.holding(*level, own, &node.id)? {
                let mut links = holder.links.clone();
                for slot in above.iter().filter(|s| level.carries(**s) && level.scope_slot() != Some(**s)) {
                    links.set(*slot, node.links.get(*slot).map(str::to_string));
                }
                if links != holder.links {
                    debug!(holder = %holder.id, ancestor = %node.id, "re-deriving cut chain");
                    self.update_links(&holder, links);
                }
            }
        }
        Ok(())
    }

    /// Inactivate `node` and clear its id from every active node that
    /// references it. Other slots on those nodes are left alone.
    pub fn inactivate(&mut self, node: &Node) -> Result<()> {
        let node = self.update(
            node,
            vec![FieldChange::Status {
                status: RecordStatus::Inactive,
            }],
        );

        if let Some(slot) = node.level.own_slot() {
            for level in Level::ALL.iter().filter(|l| l.carries(slot)) {
                for holder in self.holding(*level, slot, &node.id)? {
                    let links = holder.links.clone().with(slot, None);
                    self.update_links(&holder, links);
                }
            }
        }
        debug!(level = %node.level, id = %node.id, ops = self.ops.len(), "planned inactivation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditStamp, Gender, Person, Profile};
    use crate::memory::MemoryTxn;

    fn person_node(id: &str, level: Level, links: Links) -> Node {
        Node {
            id: id.into(),
            level,
            status: RecordStatus::Active,
            links,
            profile: Profile::Person(Person::new("Ana", id, Gender::Female)),
            allocation: None,
            created: AuditStamp::now("test"),
            updated: None,
        }
    }

    fn links(pairs: &[(Slot, &str)]) -> Links {
        let mut l = Links::default();
        for (slot, id) in pairs {
            l.set(*slot, Some(id.to_string()));
        }
        l
    }

    #[test]
    fn test_inactivation_clears_only_own_slot() {
        let txn = MemoryTxn::from_nodes(vec![
            person_node("p1", Level::Pastor, links(&[(Slot::Church, "c1")])),
            person_node("cp1", Level::Copastor, links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1")])),
            person_node(
                "sv1",
                Level::Supervisor,
                links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1"), (Slot::Copastor, "cp1")]),
            ),
        ]);
        let pastor = txn.get_by_id(Level::Pastor, "p1").unwrap().unwrap();
        let ops = propagate(&txn, &pastor, &ChangeKind::Inactivated).unwrap();

        assert_eq!(ops[0].target(), (Level::Pastor, "p1"));
        let touched: Vec<_> = ops.iter().skip(1).map(|op| op.target().1.to_string()).collect();
        assert_eq!(touched, vec!["cp1", "sv1"]);
        for op in ops.iter().skip(1) {
            assert_eq!(op.slot_changes(), vec![(Slot::Pastor, None)]);
        }
    }

    #[test]
    fn test_inactive_nodes_are_not_rewritten() {
        let mut old = person_node("cp0", Level::Copastor, links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1")]));
        old.status = RecordStatus::Inactive;
        let txn = MemoryTxn::from_nodes(vec![
            person_node("p1", Level::Pastor, links(&[(Slot::Church, "c1")])),
            old,
        ]);
        let pastor = txn.get_by_id(Level::Pastor, "p1").unwrap().unwrap();
        let ops = propagate(&txn, &pastor, &ChangeKind::Inactivated).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_retarget_rewrites_descendants() {
        let txn = MemoryTxn::from_nodes(vec![
            person_node(
                "sv1",
                Level::Supervisor,
                links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1"), (Slot::Copastor, "cp1")]),
            ),
            person_node(
                "pr1",
                Level::Preacher,
                links(&[
                    (Slot::Church, "c1"),
                    (Slot::Pastor, "p1"),
                    (Slot::Copastor, "cp1"),
                    (Slot::Supervisor, "sv1"),
                ]),
            ),
        ]);
        let sv = txn.get_by_id(Level::Supervisor, "sv1").unwrap().unwrap();
        let mut plan = CascadePlan::new(&txn);
        let new_links = links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1"), (Slot::Copastor, "cp2")]);
        plan.retarget(&sv, new_links).unwrap();
        let ops = plan.into_ops();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].target(), (Level::Supervisor, "sv1"));
        assert_eq!(ops[1].target(), (Level::Preacher, "pr1"));
        assert_eq!(ops[1].slot_changes(), vec![(Slot::Copastor, Some("cp2"))]);
    }

    #[test]
    fn test_retarget_reaches_holders_with_cut_chain() {
        // PR1 lost its supervisor; it still names CP1 and P1.
        let txn = MemoryTxn::from_nodes(vec![
            person_node("cp1", Level::Copastor, links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1")])),
            person_node(
                "pr1",
                Level::Preacher,
                links(&[(Slot::Church, "c1"), (Slot::Pastor, "p1"), (Slot::Copastor, "cp1")]),
            ),
        ]);
        let cp = txn.get_by_id(Level::Copastor, "cp1").unwrap().unwrap();
        let mut plan = CascadePlan::new(&txn);
        plan.retarget(&cp, links(&[(Slot::Church, "c1"), (Slot::Pastor, "p2")])).unwrap();
        let ops = plan.into_ops();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].target(), (Level::Preacher, "pr1"));
        assert_eq!(ops[1].slot_changes(), vec![(Slot::Pastor, Some("p2"))]);
    }

    #[test]
    fn test_unchanged_links_stage_nothing() {
        let sv = person_node("sv1", Level::Supervisor, links(&[(Slot::Copastor, "cp1")]));
        let txn = MemoryTxn::from_nodes(vec![sv.clone()]);
        let mut plan = CascadePlan::new(&txn);
        plan.retarget(&sv, sv.links.clone()).unwrap();
        assert!(plan.ops().is_empty());
    }
}
