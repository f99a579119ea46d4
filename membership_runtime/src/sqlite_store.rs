//! SQLite OrgGraph store.
//!
//! One connection behind a mutex. Every unit of work runs in an
//! IMMEDIATE transaction, which takes the write lock up front: the reads
//! a coordinator call makes (including code allocation) and its writes
//! are serialized against every other writer on the same file.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, ErrorCode, Row, Transaction, TransactionBehavior};
use tracing::debug;

use membership_engine::domain::{Allocation, AuditStamp, Links, Profile, ScopeKey};
use membership_engine::error::ErrorKind;
use membership_engine::store::apply_changes;
use membership_engine::{
    EngineError, GraphRead, GraphStore, GraphTxn, Level, MutationBatch, MutationOp, Node, RecordStatus, Slot,
    StorageError,
};

use crate::schema::{self, slot_column, NODE_COLUMNS};

/// Map a rusqlite error onto the engine's storage error kinds.
/// Constraint violations and busy/locked databases are retryable.
pub fn map_sqlite_err(err: rusqlite::Error) -> StorageError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation => ErrorKind::Conflict,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::Lock,
            _ => ErrorKind::Database,
        },
        _ => ErrorKind::Database,
    };
    StorageError::new(kind, format!("SQLite error: {}", err)).with_source(err)
}

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref()).map_err(map_sqlite_err)?;
        conn.busy_timeout(busy_timeout).map_err(map_sqlite_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(map_sqlite_err)?;
        debug!(journal_mode = %mode, "opened sqlite store");
        Self::from_connection(conn)
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        schema::init_schema(&conn).map_err(map_sqlite_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Every node, in (level, id) order.
    pub fn load_all(&self) -> Result<Vec<Node>, StorageError> {
        self.with_transaction(|txn| Ok(membership_engine::hashing::collect_nodes(&*txn)?))
            .map_err(|e| match e {
                EngineError::Storage(s) => s,
                other => StorageError::database(other.to_string()),
            })
    }
}

impl GraphStore for SqliteGraphStore {
    fn with_transaction<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut dyn GraphTxn) -> Result<T, EngineError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::lock("sqlite connection lock poisoned"))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_err)?;
        let mut txn = SqliteTxn { tx };
        // Dropping an uncommitted transaction rolls it back.
        let out = work(&mut txn)?;
        txn.tx.commit().map_err(map_sqlite_err)?;
        Ok(out)
    }
}

/// One open transaction.
pub struct SqliteTxn<'c> {
    tx: Transaction<'c>,
}

impl SqliteTxn<'_> {
    fn query_nodes(&self, filter: &str, args: &[&dyn ToSql]) -> Result<Vec<Node>, StorageError> {
        let sql = format!("SELECT {} FROM nodes WHERE {} ORDER BY id", NODE_COLUMNS, filter);
        let mut stmt = self.tx.prepare_cached(&sql).map_err(map_sqlite_err)?;
        let rows = stmt.query_map(args, NodeRow::read).map_err(map_sqlite_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(map_sqlite_err)?.into_node()?);
        }
        Ok(out)
    }

    fn insert(&self, node: &Node) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO nodes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            NODE_COLUMNS
        );
        let row = RowValues::from_node(node)?;
        self.tx
            .execute(
                &sql,
                params![
                    node.id,
                    node.level.as_str(),
                    node.status.as_str(),
                    node.links.church,
                    node.links.pastor,
                    node.links.copastor,
                    node.links.supervisor,
                    node.links.preacher,
                    node.links.zone,
                    node.links.family_group,
                    row.scope_key,
                    row.number,
                    row.code,
                    row.profile_json,
                    row.created_at,
                    node.created.by,
                    row.updated_at,
                    row.updated_by,
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    /// Rewrite every mutable column of an existing row.
    fn rewrite(&self, node: &Node) -> Result<(), StorageError> {
        let row = RowValues::from_node(node)?;
        let changed = self
            .tx
            .execute(
                "UPDATE nodes SET status = ?1,
                    church_id = ?2, pastor_id = ?3, copastor_id = ?4, supervisor_id = ?5,
                    preacher_id = ?6, zone_id = ?7, family_group_id = ?8,
                    scope_key = ?9, number = ?10, code = ?11, profile_json = ?12,
                    updated_at = ?13, updated_by = ?14
                 WHERE id = ?15 AND level = ?16",
                params![
                    node.status.as_str(),
                    node.links.church,
                    node.links.pastor,
                    node.links.copastor,
                    node.links.supervisor,
                    node.links.preacher,
                    node.links.zone,
                    node.links.family_group,
                    row.scope_key,
                    row.number,
                    row.code,
                    row.profile_json,
                    row.updated_at,
                    row.updated_by,
                    node.id,
                    node.level.as_str(),
                ],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StorageError::node_not_found(node.level, &node.id));
        }
        Ok(())
    }
}

impl GraphRead for SqliteTxn<'_> {
    fn get_by_id(&self, level: Level, id: &str) -> Result<Option<Node>, StorageError> {
        let mut found = self.query_nodes("id = ?1 AND level = ?2", &[&id, &level.as_str()])?;
        Ok(found.pop())
    }

    fn list_by_level(&self, level: Level) -> Result<Vec<Node>, StorageError> {
        self.query_nodes("level = ?1", &[&level.as_str()])
    }

    fn list_by_slot(&self, level: Level, slot: Slot, id: &str) -> Result<Vec<Node>, StorageError> {
        let filter = format!("level = ?1 AND {} = ?2", slot_column(slot));
        self.query_nodes(&filter, &[&level.as_str(), &id])
    }

    fn list_by_scope(&self, level: Level, scope: &ScopeKey) -> Result<Vec<Node>, StorageError> {
        self.query_nodes("level = ?1 AND scope_key = ?2", &[&level.as_str(), &scope.as_key()])
    }
}

impl GraphTxn for SqliteTxn<'_> {
    fn apply_mutations(&mut self, batch: &MutationBatch) -> Result<(), StorageError> {
        debug!(ops = batch.ops.len(), by = %batch.stamp.by, "writing mutation batch");
        for op in &batch.ops {
            match op {
                MutationOp::Insert { node } => self.insert(node)?,
                MutationOp::Update { level, id, changes } => {
                    let mut node = self
                        .get_by_id(*level, id)?
                        .ok_or_else(|| StorageError::node_not_found(*level, id))?;
                    apply_changes(&mut node, changes, &batch.stamp);
                    self.rewrite(&node)?;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::serialization(format!("bad timestamp {:?}: {}", s, e)))
}

/// Derived column values for a write.
struct RowValues {
    scope_key: Option<String>,
    number: Option<u32>,
    code: Option<String>,
    profile_json: String,
    created_at: String,
    updated_at: Option<String>,
    updated_by: Option<String>,
}

impl RowValues {
    fn from_node(node: &Node) -> Result<Self, StorageError> {
        Ok(Self {
            scope_key: node.allocation.as_ref().map(|a| a.scope.as_key()),
            number: node.allocation.as_ref().map(|a| a.number),
            code: node.allocation.as_ref().map(|a| a.code.clone()),
            profile_json: serde_json::to_string(&node.profile)?,
            created_at: format_time(&node.created.at),
            updated_at: node.updated.as_ref().map(|u| format_time(&u.at)),
            updated_by: node.updated.as_ref().map(|u| u.by.clone()),
        })
    }
}

/// Raw column values of one row, converted to a `Node` outside the
/// rusqlite row callback.
struct NodeRow {
    id: String,
    level: String,
    status: String,
    slots: Vec<Option<String>>,
    scope_key: Option<String>,
    number: Option<u32>,
    code: Option<String>,
    profile_json: String,
    created_at: String,
    created_by: String,
    updated_at: Option<String>,
    updated_by: Option<String>,
}

impl NodeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut slots = Vec::with_capacity(Slot::ALL.len());
        for i in 0..Slot::ALL.len() {
            slots.push(row.get(3 + i)?);
        }
        Ok(Self {
            id: row.get(0)?,
            level: row.get(1)?,
            status: row.get(2)?,
            slots,
            scope_key: row.get(10)?,
            number: row.get(11)?,
            code: row.get(12)?,
            profile_json: row.get(13)?,
            created_at: row.get(14)?,
            created_by: row.get(15)?,
            updated_at: row.get(16)?,
            updated_by: row.get(17)?,
        })
    }

    fn into_node(self) -> Result<Node, StorageError> {
        let bad = |what: &str, e: String| StorageError::serialization(format!("row {}: bad {}: {}", self.id, what, e));
        let level: Level = self.level.parse().map_err(|e| bad("level", e))?;
        let status: RecordStatus = self.status.parse().map_err(|e| bad("status", e))?;

        let mut links = Links::default();
        for (slot, value) in Slot::ALL.iter().zip(self.slots.iter()) {
            links.set(*slot, value.clone());
        }

        let allocation = match (&self.scope_key, self.number, &self.code) {
            (Some(key), Some(number), Some(code)) => {
                let scope = ScopeKey::parse_key(key).ok_or_else(|| bad("scope_key", key.clone()))?;
                Some(Allocation {
                    scope,
                    number,
                    code: code.clone(),
                })
            }
            (None, None, None) => None,
            _ => return Err(bad("allocation", "partially set".to_string())),
        };

        let profile: Profile = serde_json::from_str(&self.profile_json)?;
        let created = AuditStamp {
            at: parse_time(&self.created_at)?,
            by: self.created_by.clone(),
        };
        let updated = match (&self.updated_at, &self.updated_by) {
            (Some(at), Some(by)) => Some(AuditStamp {
                at: parse_time(at)?,
                by: by.clone(),
            }),
            _ => None,
        };

        Ok(Node {
            id: self.id,
            level,
            status,
            links,
            profile,
            allocation,
            created,
            updated,
        })
    }
}
