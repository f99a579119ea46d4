/// Membership Engine: Transaction Coordinator
///
/// Public entry points. Each call opens one store transaction, validates,
/// plans the cascade, applies the batch and returns. Any error rolls the
/// whole transaction back, so a rejected call leaves no partial writes.

use tracing::{debug, info, warn};

use crate::allocator;
use crate::cascade::{self, CascadePlan, ChangeKind};
use crate::commands::{Command, Outcome};
use crate::domain::{Attachment, AuditStamp, Level, Links, Node, NodeDraft, Profile, RecordStatus, ScopeKey, Slot};
use crate::error::{EngineError, Result, StorageError};
use crate::graph;
use crate::ids::{new_node_id, validate_node_id};
use crate::invariants;
use crate::store::{FieldChange, GraphRead, GraphStore, GraphTxn, MutationBatch, MutationOp};
use crate::validator::{self, ResolvedChain};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Recorded in the audit stamp of every write.
    pub actor: String,
    /// Re-check the whole graph before commit and roll back on violation.
    pub audit_after_write: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            actor: "system".to_string(),
            audit_after_write: false,
        }
    }
}

pub struct Coordinator<S> {
    store: S,
    options: EngineOptions,
}

impl<S: GraphStore> Coordinator<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, EngineOptions::default())
    }

    pub fn with_options(store: S, options: EngineOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Create a node under `superior_id`. Churches take an optional
    /// mother church; every other level requires a superior.
    pub fn create(&self, level: Level, draft: NodeDraft, superior_id: Option<&str>) -> Result<Node> {
        let result = self.store.with_transaction(|txn| self.create_in(txn, level, draft, superior_id));
        self.log_result("create", level, superior_id.unwrap_or("-"), &result);
        result
    }

    /// Move an existing node under `new_superior_id`, optionally
    /// re-scoping a grouping, and cascade to its subtree.
    pub fn reassign(
        &self,
        level: Level,
        id: &str,
        new_superior_id: &str,
        new_scope: Option<ScopeKey>,
    ) -> Result<Node> {
        let result = self
            .store
            .with_transaction(|txn| self.reassign_in(txn, level, id, new_superior_id, new_scope));
        self.log_result("reassign", level, id, &result);
        result
    }

    /// Inactivate a node and detach everything that references it.
    pub fn inactivate(&self, level: Level, id: &str) -> Result<()> {
        let result = self.store.with_transaction(|txn| self.inactivate_in(txn, level, id));
        self.log_result("inactivate", level, id, &result);
        result
    }

    pub fn execute(&self, command: Command) -> Result<Outcome> {
        match command {
            Command::Create {
                level,
                draft,
                superior_id,
            } => self
                .create(level, draft, superior_id.as_deref())
                .map(|node| Outcome::Created { node }),
            Command::Reassign {
                level,
                id,
                superior_id,
                new_scope,
            } => self
                .reassign(level, &id, &superior_id, new_scope)
                .map(|node| Outcome::Reassigned { node }),
            Command::Inactivate { level, id } => {
                self.inactivate(level, &id)?;
                Ok(Outcome::Inactivated { level, id })
            }
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get(&self, level: Level, id: &str) -> Result<Option<Node>> {
        self.store
            .with_transaction(|txn| Ok(txn.get_by_id(level, id)?))
    }

    pub fn attachment(&self, level: Level, id: &str) -> Result<Attachment> {
        let node = self
            .get(level, id)?
            .ok_or_else(|| EngineError::not_found(level, id))?;
        Ok(graph::attachment_of(&node))
    }

    /// Active nodes that need a manual reassignment.
    pub fn detached(&self) -> Result<Vec<Node>> {
        self.store
            .with_transaction(|txn| Ok(graph::find_detached(&*txn)?))
    }

    // ── Transaction bodies ─────────────────────────────────────────

    fn create_in(
        &self,
        txn: &mut dyn GraphTxn,
        level: Level,
        draft: NodeDraft,
        superior_id: Option<&str>,
    ) -> Result<Node> {
        if !draft.profile.fits(level) {
            return Err(EngineError::InvalidInput(format!(
                "profile does not describe a {}",
                level
            )));
        }
        let id = draft.id.unwrap_or_else(new_node_id);
        validate_node_id(&id)?;
        for existing in Level::ALL {
            if txn.get_by_id(existing, &id)?.is_some() {
                return Err(EngineError::InvalidInput(format!("node id {} already in use", id)));
            }
        }

        let chain = match (level, superior_id) {
            (Level::Church, None) => None,
            (_, Some(superior)) => Some(validator::validate_assignment(
                &*txn, level, None, superior, None,
            )?),
            (_, None) => {
                return Err(EngineError::InvalidInput(format!(
                    "a {} must be created under a {}",
                    level,
                    level.superior_level()
                )))
            }
        };

        let mut links = match &chain {
            Some(c) => c.links_for(level, &Links::default()),
            None => Links::default(),
        };
        let allocation = match &chain {
            Some(c) if level.is_grouping() => {
                let scope = grouping_scope(level, &draft.profile, &c.superior)?;
                if let Some(slot) = level.scope_slot() {
                    links.set(slot, Some(scope.anchor_id().to_string()));
                }
                Some(allocator::allocate(&*txn, level, &scope)?)
            }
            _ => None,
        };

        let stamp = self.stamp();
        let node = Node {
            id: id.clone(),
            level,
            status: RecordStatus::Active,
            links,
            profile: draft.profile,
            allocation,
            created: stamp.clone(),
            updated: None,
        };

        let ops = {
            let mut plan = CascadePlan::new(&*txn);
            plan.insert(node);
            // A new grouping is linked from its responsible node, which
            // carries the link down to its own subordinates.
            if let Some(c) = chain.as_ref().filter(|_| level.is_grouping()) {
                let responsible = &c.superior;
                if let Some(link) = responsible.level.grouping_link() {
                    plan.retarget(responsible, responsible.links.clone().with(link, Some(id.clone())))?;
                }
            }
            plan.into_ops()
        };
        self.commit(txn, stamp, ops)?;

        txn.get_by_id(level, &id)?
            .ok_or_else(|| StorageError::node_not_found(level, &id).into())
    }

    fn reassign_in(
        &self,
        txn: &mut dyn GraphTxn,
        level: Level,
        id: &str,
        new_superior_id: &str,
        new_scope: Option<ScopeKey>,
    ) -> Result<Node> {
        let node = txn
            .get_by_id(level, id)?
            .ok_or_else(|| EngineError::not_found(level, id))?;
        if !node.is_active() {
            return Err(EngineError::AlreadyInactive {
                level,
                id: id.to_string(),
            });
        }
        let new_scope = new_scope.map(|s| s.normalized());
        let chain = validator::validate_assignment(&*txn, level, Some(&node), new_superior_id, new_scope.as_ref())?;

        let ops = if level.is_grouping() {
            self.plan_grouping_move(&*txn, &node, &chain, new_scope.as_ref())?
        } else if level == Level::Church {
            let mut plan = CascadePlan::new(&*txn);
            plan.update_links(&node, node.links.clone().with(Slot::Church, Some(chain.superior.id.clone())));
            plan.into_ops()
        } else {
            cascade::propagate(&*txn, &node, &ChangeKind::SuperiorChanged(chain))?
        };

        let stamp = self.stamp();
        self.commit(txn, stamp, ops)?;
        txn.get_by_id(level, id)?
            .ok_or_else(|| StorageError::node_not_found(level, id).into())
    }

    /// Detach the grouping from its old responsible node, move it (and
    /// re-scope it when asked), then link it from the new one.
    fn plan_grouping_move(
        &self,
        read: &dyn GraphTxn,
        grouping: &Node,
        chain: &ResolvedChain,
        new_scope: Option<&ScopeKey>,
    ) -> Result<Vec<MutationOp>> {
        let responsible = &chain.superior;
        let link = responsible.level.grouping_link().ok_or_else(|| {
            EngineError::InvalidInput(format!("{} cannot lead a {}", responsible.level, grouping.level))
        })?;
        let mut plan = CascadePlan::new(read);

        if let Some(old_id) = grouping.superior_id() {
            if old_id != responsible.id {
                if let Some(old) = plan.current(responsible.level, old_id)? {
                    if old.is_active() && old.links.get(link) == Some(grouping.id.as_str()) {
                        plan.retarget(&old, old.links.clone().with(link, None))?;
                    }
                }
            }
        }

        let staged = plan
            .current(grouping.level, &grouping.id)?
            .unwrap_or_else(|| grouping.clone());
        let mut links = chain.links_for(grouping.level, &staged.links);
        let current_scope = grouping.allocation.as_ref().map(|a| &a.scope);
        if let Some(scope) = new_scope.filter(|s| Some(*s) != current_scope) {
            let allocation = allocator::allocate(read, grouping.level, scope)?;
            if let Some(slot) = grouping.level.scope_slot() {
                links.set(slot, Some(scope.anchor_id().to_string()));
            }
            let mut changes = vec![FieldChange::Allocation { allocation }];
            if let (Profile::Zone(zone), ScopeKey::ChurchDistrict { district, .. }) = (&grouping.profile, scope) {
                let mut zone = zone.clone();
                zone.district = district.clone();
                changes.push(FieldChange::Profile {
                    profile: Profile::Zone(zone),
                });
            }
            plan.update(grouping, changes);
        }
        plan.update_links(grouping, links);

        let responsible = plan
            .current(responsible.level, &responsible.id)?
            .unwrap_or_else(|| responsible.clone());
        if responsible.links.get(link) != Some(grouping.id.as_str()) {
            let next = responsible.links.clone().with(link, Some(grouping.id.clone()));
            plan.retarget(&responsible, next)?;
        }
        Ok(plan.into_ops())
    }

    fn inactivate_in(&self, txn: &mut dyn GraphTxn, level: Level, id: &str) -> Result<()> {
        let node = txn
            .get_by_id(level, id)?
            .ok_or_else(|| EngineError::not_found(level, id))?;
        if !node.is_active() {
            return Err(EngineError::AlreadyInactive {
                level,
                id: id.to_string(),
            });
        }
        let ops = cascade::propagate(&*txn, &node, &ChangeKind::Inactivated)?;
        let stamp = self.stamp();
        self.commit(txn, stamp, ops)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn stamp(&self) -> AuditStamp {
        AuditStamp::now(self.options.actor.clone())
    }

    fn commit(&self, txn: &mut dyn GraphTxn, stamp: AuditStamp, ops: Vec<MutationOp>) -> Result<()> {
        debug!(ops = ops.len(), "applying mutation batch");
        let batch = MutationBatch { stamp, ops };
        if !batch.is_empty() {
            txn.apply_mutations(&batch)?;
        }
        if self.options.audit_after_write {
            invariants::audit_graph(&*txn)?;
        }
        Ok(())
    }

    fn log_result<T>(&self, op: &str, level: Level, id: &str, result: &Result<T>) {
        match result {
            Ok(_) => info!(op, level = %level, id, actor = %self.options.actor, "committed"),
            Err(err) => warn!(op, level = %level, id, reason = err.reason(), error = %err, "rejected"),
        }
    }
}

/// Scope a new grouping is numbered in, taken from its responsible node.
fn grouping_scope(level: Level, profile: &Profile, responsible: &Node) -> Result<ScopeKey> {
    let missing = |slot: Slot| {
        EngineError::ScopeConflict(format!(
            "{} {} has no {}",
            responsible.level, responsible.id, slot
        ))
    };
    match (level, profile) {
        (Level::Zone, Profile::Zone(zone)) => {
            let church = responsible.links.church.as_deref().ok_or_else(|| missing(Slot::Church))?;
            Ok(ScopeKey::church_district(church, &zone.district))
        }
        (Level::FamilyGroup, _) => {
            let zone = responsible.links.zone.as_deref().ok_or_else(|| missing(Slot::Zone))?;
            Ok(ScopeKey::zone(zone))
        }
        _ => Err(EngineError::InvalidInput(format!("{} is not numbered", level))),
    }
}
