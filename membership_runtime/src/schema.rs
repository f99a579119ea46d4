//! SQLite schema for the OrgGraph.
//!
//! One `nodes` table holds every level. Slot columns are indexed for the
//! cascade's by-superior and by-slot lookups; the unique index on
//! (level, scope_key, number) is the last line against double-allocated
//! grouping codes.

use rusqlite::Connection;

use membership_engine::Slot;

/// Bumped on any incompatible change to the tables below.
pub const SCHEMA_VERSION: i32 = 1;

pub const NODE_COLUMNS: &str = "id, level, status, \
    church_id, pastor_id, copastor_id, supervisor_id, preacher_id, zone_id, family_group_id, \
    scope_key, number, code, profile_json, created_at, created_by, updated_at, updated_by";

/// Column holding `slot`, in the same order as `Slot::ALL`.
pub fn slot_column(slot: Slot) -> &'static str {
    match slot {
        Slot::Church => "church_id",
        Slot::Pastor => "pastor_id",
        Slot::Copastor => "copastor_id",
        Slot::Supervisor => "supervisor_id",
        Slot::Preacher => "preacher_id",
        Slot::Zone => "zone_id",
        Slot::FamilyGroup => "family_group_id",
    }
}

/// Create tables and indexes if missing.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            status TEXT NOT NULL,
            church_id TEXT,
            pastor_id TEXT,
            copastor_id TEXT,
            supervisor_id TEXT,
            preacher_id TEXT,
            zone_id TEXT,
            family_group_id TEXT,
            scope_key TEXT,
            number INTEGER,
            code TEXT,
            profile_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TEXT,
            updated_by TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_level ON nodes(level, status);
        CREATE INDEX IF NOT EXISTS idx_nodes_church ON nodes(church_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_pastor ON nodes(pastor_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_copastor ON nodes(copastor_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_supervisor ON nodes(supervisor_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_preacher ON nodes(preacher_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_zone ON nodes(zone_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_family_group ON nodes(family_group_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_scope_number
            ON nodes(level, scope_key, number) WHERE number IS NOT NULL;",
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_slot_columns_exist() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for slot in Slot::ALL {
            let sql = format!("SELECT {} FROM nodes", slot_column(slot));
            assert!(conn.prepare(&sql).is_ok(), "{}", slot);
        }
    }
}
