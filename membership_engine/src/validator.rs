/// Membership Engine: Consistency Validator
///
/// Read-only checks run before any mutation is computed. A successful
/// check returns the resolved chain of the proposed superior so the
/// cascade can reuse it without a second round of lookups.

use std::collections::BTreeSet;

use crate::domain::{Level, Links, Node, ScopeKey, Slot};
use crate::error::{EngineError, Result};
use crate::ids::validate_node_id;
use crate::store::GraphRead;

/// A proposed superior together with every node its links name, all
/// verified to exist and be active.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    pub superior: Node,
    /// Nodes named by the superior's set slots, in slot order.
    pub ancestors: Vec<Node>,
}

impl ResolvedChain {
    /// Links a node of `level` holds under this superior, keeping the
    /// slots of `current` that are not inherited.
    pub fn links_for(&self, level: Level, current: &Links) -> Links {
        current.inherit_from(level, &self.superior.id, &self.superior.links)
    }

    pub fn ancestor(&self, level: Level) -> Option<&Node> {
        self.ancestors.iter().find(|n| n.level == level)
    }
}

/// Fetch the node `slot` of `level` names, requiring it to exist and be
/// active.
fn fetch_active<R: GraphRead + ?Sized>(read: &R, level: Level, id: &str) -> Result<Node> {
    let node = read
        .get_by_id(level, id)?
        .ok_or_else(|| EngineError::not_found(level, id))?;
    if !node.is_active() {
        return Err(EngineError::inactive(level, id));
    }
    Ok(node)
}

/// Resolve the superior a node of `level` would get, walking every link
/// the superior holds.
pub fn resolve_superior<R: GraphRead + ?Sized>(
    read: &R,
    level: Level,
    superior_id: &str,
) -> Result<ResolvedChain> {
    validate_node_id(superior_id)?;
    let superior = fetch_active(read, level.superior_level(), superior_id)?;

    let mut ancestors = Vec::new();
    for slot in superior.level.carried_slots() {
        if let Some(id) = superior.links.get(*slot) {
            ancestors.push(fetch_active(read, slot.target_level(), id)?);
        }
    }

    Ok(ResolvedChain {
        superior,
        ancestors,
    })
}

/// Validate assigning `proposed_superior_id` to a node of `level`.
///
/// `target` is the existing node for a reassignment, `None` for a
/// creation. `new_scope` is the explicit re-scope a grouping move may
/// carry.
pub fn validate_assignment<R: GraphRead + ?Sized>(
    read: &R,
    level: Level,
    target: Option<&Node>,
    proposed_superior_id: &str,
    new_scope: Option<&ScopeKey>,
) -> Result<ResolvedChain> {
    if let Some(t) = target {
        if t.id == proposed_superior_id {
            return Err(EngineError::InvalidInput(format!(
                "{} {} cannot be its own superior",
                level, t.id
            )));
        }
    }

    let chain = resolve_superior(read, level, proposed_superior_id)?;

    if level == Level::Church {
        if let Some(t) = target {
            check_church_cycle(read, &t.id, &chain.superior)?;
        }
    }

    if level.is_grouping() {
        check_grouping(read, level, target, &chain.superior, new_scope)?;
    } else if new_scope.is_some() {
        return Err(EngineError::InvalidInput(format!(
            "{} is not a grouping and cannot be re-scoped",
            level
        )));
    }

    Ok(chain)
}

/// A church may not become an anexe of one of its own anexes.
fn check_church_cycle<R: GraphRead + ?Sized>(read: &R, church_id: &str, mother: &Node) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut cursor = mother.links.get(Slot::Church).map(str::to_string);
    while let Some(id) = cursor {
        if id == church_id {
            return Err(EngineError::InvalidInput(format!(
                "church {} cannot become an anexe of its own anexe {}",
                church_id, mother.id
            )));
        }
        if !seen.insert(id.clone()) {
            break;
        }
        cursor = read
            .get_by_id(Level::Church, &id)?
            .and_then(|c| c.links.church);
    }
    Ok(())
}

fn check_grouping<R: GraphRead + ?Sized>(
    read: &R,
    level: Level,
    target: Option<&Node>,
    responsible: &Node,
    new_scope: Option<&ScopeKey>,
) -> Result<()> {
    // One grouping per responsible node.
    if let Some(link) = responsible.level.grouping_link() {
        if let Some(led) = responsible.links.get(link) {
            let same = target.map_or(false, |t| t.id == led);
            if !same {
                let still_active = read
                    .get_by_id(level, led)?
                    .map_or(false, |g| g.is_active());
                if still_active {
                    return Err(EngineError::ScopeConflict(format!(
                        "{} {} already leads {} {}",
                        responsible.level, responsible.id, level, led
                    )));
                }
            }
        }
    }

    // Re-sending the grouping's own scope is not a re-scope.
    let current_scope = target.and_then(|t| t.allocation.as_ref()).map(|a| &a.scope);
    if let Some(scope) = new_scope.filter(|s| Some(*s) != current_scope) {
        return check_new_scope(level, responsible, scope);
    }

    match target {
        Some(grouping) => {
            if !grouping_accepts(grouping, &responsible.links) {
                return Err(EngineError::ScopeConflict(format!(
                    "{} {} keeps copastor {:?}/pastor {:?} in scope {:?}; {} {} resolves to \
                     copastor {:?}/pastor {:?} in scope {:?} (supply a new scope to move it)",
                    level,
                    grouping.id,
                    grouping.links.copastor,
                    grouping.links.pastor,
                    scope_anchor(grouping),
                    responsible.level,
                    responsible.id,
                    responsible.links.copastor,
                    responsible.links.pastor,
                    level.scope_slot().and_then(|s| responsible.links.get(s)),
                )));
            }
        }
        None => {
            let anchor = level.scope_slot().and_then(|s| responsible.links.get(s));
            if anchor.is_none() {
                return Err(EngineError::ScopeConflict(format!(
                    "{} {} has no {} to create a {} in",
                    responsible.level,
                    responsible.id,
                    level.scope_slot().map_or("scope", |s| s.as_str()),
                    level
                )));
            }
        }
    }
    Ok(())
}

/// An explicit re-scope must name the scope the responsible node
/// actually sits in.
fn check_new_scope(level: Level, responsible: &Node, scope: &ScopeKey) -> Result<()> {
    if scope.numbered_level() != level {
        return Err(EngineError::InvalidInput(format!(
            "scope {} cannot number a {}",
            scope.as_key(),
            level
        )));
    }
    let slot = match scope {
        ScopeKey::ChurchDistrict { .. } => Slot::Church,
        ScopeKey::Zone { .. } => Slot::Zone,
    };
    let anchor = scope.anchor_id();
    if responsible.links.get(slot) != Some(anchor) {
        return Err(EngineError::ScopeConflict(format!(
            "{} {} is not in {} {}",
            responsible.level, responsible.id, slot, anchor
        )));
    }
    Ok(())
}

fn scope_anchor(grouping: &Node) -> Option<&str> {
    grouping.level.scope_slot().and_then(|s| grouping.links.get(s))
}

/// Whether `grouping` can take a responsible node with links
/// `responsible` without mixing two chains.
///
/// A grouping with an established Copastor+Pastor pair only accepts the
/// same pair, and always requires the responsible node to sit in the
/// grouping's scope (church for zones, zone for family groups).
pub fn grouping_accepts(grouping: &Node, responsible: &Links) -> bool {
    let own = &grouping.links;
    let established = own.copastor.is_some() && own.pastor.is_some();
    if established && (own.copastor != responsible.copastor || own.pastor != responsible.pastor) {
        return false;
    }
    match grouping.level.scope_slot() {
        Some(slot) => own.get(slot).is_some() && own.get(slot) == responsible.get(slot),
        None => true,
    }
}

/// Links of `grouping` after detaching it from its responsible node:
/// the responsible slot is cleared and so is every inherited slot that
/// disagrees with the responsible node's new links. Scope is kept.
pub fn detached_grouping_links(grouping: &Node, responsible: &Links) -> Links {
    let mut links = grouping.links.clone();
    links.set(grouping.level.superior_slot(), None);
    for slot in grouping.level.inherited_slots() {
        if grouping.links.get(*slot) != responsible.get(*slot) {
            links.set(*slot, None);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditStamp, Profile, RecordStatus, ZoneProfile};

    fn zone_with(copastor: &str, pastor: &str, church: &str) -> Node {
        Node {
            id: "z1".into(),
            level: Level::Zone,
            status: RecordStatus::Active,
            links: Links {
                church: Some(church.into()),
                pastor: Some(pastor.into()),
                copastor: Some(copastor.into()),
                supervisor: Some("sv1".into()),
                ..Default::default()
            },
            profile: Profile::Zone(ZoneProfile {
                name: "North".into(),
                district: "Comas".into(),
            }),
            allocation: None,
            created: AuditStamp::now("test"),
            updated: None,
        }
    }

    fn supervisor_links(copastor: &str, pastor: &str, church: &str) -> Links {
        Links {
            church: Some(church.into()),
            pastor: Some(pastor.into()),
            copastor: Some(copastor.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_grouping_accepts_same_chain() {
        let z = zone_with("cp1", "p1", "c1");
        assert!(grouping_accepts(&z, &supervisor_links("cp1", "p1", "c1")));
    }

    #[test]
    fn test_grouping_rejects_other_copastor() {
        let z = zone_with("cp1", "p1", "c1");
        assert!(!grouping_accepts(&z, &supervisor_links("cp2", "p1", "c1")));
    }

    #[test]
    fn test_grouping_rejects_other_church() {
        let z = zone_with("cp1", "p1", "c1");
        assert!(!grouping_accepts(&z, &supervisor_links("cp1", "p1", "c2")));
    }

    #[test]
    fn test_unestablished_grouping_accepts_any_pair() {
        let mut z = zone_with("cp1", "p1", "c1");
        z.links.copastor = None;
        assert!(grouping_accepts(&z, &supervisor_links("cp9", "p9", "c1")));
    }

    #[test]
    fn test_detached_links_keep_agreeing_slots() {
        let z = zone_with("cp1", "p1", "c1");
        let links = detached_grouping_links(&z, &supervisor_links("cp2", "p1", "c1"));
        assert_eq!(links.supervisor, None);
        assert_eq!(links.copastor, None);
        assert_eq!(links.pastor.as_deref(), Some("p1"));
        assert_eq!(links.church.as_deref(), Some("c1"));
    }
}
