//! Integration tests for membership_runtime.
//!
//! All tests use temporary directories for isolation.

use std::fs;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use membership_engine::{Attachment, Command, Level, Outcome};
use membership_runtime::drift::{compare_graphs, replay_hash, verify_determinism};
use membership_runtime::snapshot::{load_latest_snapshot, load_snapshot, save_snapshot, verify_snapshot};
use membership_runtime::{RuntimeConfig, RuntimeError, Session, SharedSession};

fn config_in(dir: &TempDir) -> RuntimeConfig {
    RuntimeConfig {
        database_path: dir.path().join("church.db"),
        snapshot_dir: dir.path().join("snapshots"),
        actor: "secretary".to_string(),
        ..RuntimeConfig::default()
    }
}

fn person(id: &str, level: &str, superior: &str) -> String {
    format!(
        r#"{{"command": "create", "level": "{level}", "superior_id": "{superior}",
            "draft": {{"id": "{id}", "profile": {{"type": "person", "first_names": "N", "last_names": "{id}", "gender": "male"}}}}}}"#
    )
}

/// C1 ─ P1 ─┬─ CP1 ─ SV1 (leads Z1) ─ PR1 (leads FG1) ─ D1
///          └─ CP2 ─ SV2
fn seed_commands() -> Vec<Command> {
    let items = [
        r#"{"command": "create", "level": "church",
            "draft": {"id": "c1", "profile": {"type": "church", "name": "Central", "abbreviated_name": "CEN"}}}"#
            .to_string(),
        person("p1", "pastor", "c1"),
        person("cp1", "copastor", "p1"),
        person("cp2", "copastor", "p1"),
        person("sv1", "supervisor", "cp1"),
        person("sv2", "supervisor", "cp2"),
        r#"{"command": "create", "level": "zone", "superior_id": "sv1",
            "draft": {"id": "z1", "profile": {"type": "zone", "name": "Norte", "district": "Comas"}}}"#
            .to_string(),
        person("pr1", "preacher", "sv1"),
        r#"{"command": "create", "level": "family_group", "superior_id": "pr1",
            "draft": {"id": "fg1", "profile": {"type": "family_group", "name": "Betel"}}}"#
            .to_string(),
        person("d1", "disciple", "pr1"),
    ];
    Command::parse_batch(&format!("[{}]", items.join(","))).unwrap()
}

fn seeded_session(dir: &TempDir) -> Session {
    let mut session = Session::open(config_in(dir)).unwrap();
    session.run_batch(&seed_commands()).unwrap();
    session
}

fn reassign_pr1_to_sv2() -> Command {
    Command::Reassign {
        level: Level::Preacher,
        id: "pr1".to_string(),
        superior_id: "sv2".to_string(),
        new_scope: None,
    }
}

fn inactivate(level: Level, id: &str) -> Command {
    Command::Inactivate {
        level,
        id: id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────
// Sessions over SQLite
// ─────────────────────────────────────────────────────────────

#[test]
fn sqlite_session_matches_in_memory_replay() {
    let dir = TempDir::new().unwrap();
    let session = seeded_session(&dir);
    assert_eq!(session.applied(), 10);
    assert_eq!(session.current_hash().unwrap(), replay_hash(&seed_commands()).unwrap());
    session.audit().unwrap();
}

#[test]
fn grouping_codes_are_persisted() {
    let dir = TempDir::new().unwrap();
    let session = seeded_session(&dir);
    let z1 = session.coordinator().get(Level::Zone, "z1").unwrap().unwrap();
    assert_eq!(z1.code(), Some("COMAS-1"));
    let fg1 = session.coordinator().get(Level::FamilyGroup, "fg1").unwrap().unwrap();
    assert_eq!(fg1.code(), Some("NORTE-1"));
    assert_eq!(fg1.links.zone.as_deref(), Some("z1"));
}

#[test]
fn reassign_cascade_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let hash = {
        let mut session = seeded_session(&dir);
        let pr1 = session.reassign(Level::Preacher, "pr1", "sv2", None).unwrap();
        assert_eq!(pr1.links.supervisor.as_deref(), Some("sv2"));
        session.current_hash().unwrap()
    };

    let session = Session::open(config_in(&dir)).unwrap();
    assert_eq!(session.current_hash().unwrap(), hash);
    session.audit().unwrap();

    let engine = session.coordinator();
    let fg1 = engine.get(Level::FamilyGroup, "fg1").unwrap().unwrap();
    assert_eq!(fg1.links.preacher, None);
    assert_eq!(fg1.links.pastor.as_deref(), Some("p1"));
    assert_eq!(engine.attachment(Level::FamilyGroup, "fg1").unwrap(), Attachment::PartiallyDetached);

    let d1 = engine.get(Level::Disciple, "d1").unwrap().unwrap();
    assert_eq!(d1.links.copastor.as_deref(), Some("cp2"));
    assert_eq!(d1.links.supervisor.as_deref(), Some("sv2"));
    assert_eq!(d1.links.family_group, None);
}

#[test]
fn rejected_command_leaves_database_untouched() {
    let dir = TempDir::new().unwrap();
    let mut session = seeded_session(&dir);
    session.inactivate(Level::Disciple, "d1").unwrap();
    let before = session.current_hash().unwrap();
    let applied = session.applied();

    let err = session.execute(&inactivate(Level::Disciple, "d1")).unwrap_err();
    match err {
        RuntimeError::Engine(e) => assert_eq!(e.reason(), "already_inactive"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(session.current_hash().unwrap(), before);
    assert_eq!(session.applied(), applied);
}

#[test]
fn batch_stops_at_first_rejection() {
    let dir = TempDir::new().unwrap();
    let mut session = seeded_session(&dir);
    let batch = vec![
        inactivate(Level::Disciple, "d1"),
        inactivate(Level::Disciple, "ghost"),
        inactivate(Level::Copastor, "cp2"),
    ];
    assert!(session.run_batch(&batch).is_err());

    let engine = session.coordinator();
    assert!(!engine.get(Level::Disciple, "d1").unwrap().unwrap().is_active());
    assert!(engine.get(Level::Copastor, "cp2").unwrap().unwrap().is_active());
}

#[test]
fn inactivating_copastor_lists_detached_nodes() {
    let dir = TempDir::new().unwrap();
    let mut session = seeded_session(&dir);
    assert!(session.detached().unwrap().is_empty());

    let outcome = session.execute(&inactivate(Level::Copastor, "cp1")).unwrap();
    assert!(matches!(outcome, Outcome::Inactivated { level: Level::Copastor, .. }));

    let detached: Vec<String> = session.detached().unwrap().into_iter().map(|n| n.id).collect();
    for id in ["sv1", "pr1", "d1"] {
        assert!(detached.iter().any(|d| d == id), "{} should be detached", id);
    }
    assert!(!detached.iter().any(|d| d == "sv2"));
}

#[test]
fn shared_session_serializes_writers() {
    let dir = TempDir::new().unwrap();
    let shared = Arc::new(SharedSession::new(seeded_session(&dir)));

    let handles: Vec<_> = ["sv2", "d1"]
        .into_iter()
        .map(|id| {
            let shared = Arc::clone(&shared);
            let level = if id == "sv2" { Level::Supervisor } else { Level::Disciple };
            thread::spawn(move || shared.execute(&inactivate(level, id)).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(shared.applied().unwrap(), 12);
}

// ─────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────

#[test]
fn snapshot_round_trip_verifies() {
    let dir = TempDir::new().unwrap();
    let session = seeded_session(&dir);
    let path = session.snapshot().unwrap();
    assert!(path.ends_with("snapshot_000010.json"));

    let snap = load_snapshot(&session.config().snapshot_dir, 10).unwrap().unwrap();
    assert_eq!(snap.nodes.len(), 10);
    assert_eq!(snap.hash, session.current_hash().unwrap());
    verify_snapshot(&snap).unwrap();
}

#[test]
fn tampered_snapshot_is_rejected() {
    let dir = TempDir::new().unwrap();
    let session = seeded_session(&dir);
    let path = session.snapshot().unwrap();

    let content = fs::read_to_string(&path).unwrap();
    fs::write(&path, content.replace("COMAS-1", "COMAS-9")).unwrap();

    let snap = load_latest_snapshot(&session.config().snapshot_dir).unwrap().unwrap();
    let err = verify_snapshot(&snap).unwrap_err();
    assert!(matches!(err, RuntimeError::CorruptSnapshot { sequence: 10, .. }));
}

#[test]
fn auto_snapshot_at_interval() {
    let dir = TempDir::new().unwrap();
    let config = RuntimeConfig {
        snapshot_interval: 4,
        ..config_in(&dir)
    };
    let mut session = Session::open(config).unwrap();
    session.run_batch(&seed_commands()).unwrap();

    let snap_dir = &session.config().snapshot_dir;
    assert!(load_snapshot(snap_dir, 4).unwrap().is_some());
    assert!(load_snapshot(snap_dir, 8).unwrap().is_some());
    assert!(load_snapshot(snap_dir, 10).unwrap().is_none());
    assert_eq!(load_latest_snapshot(snap_dir).unwrap().unwrap().sequence, 8);
}

#[test]
fn reopened_session_continues_snapshot_sequence() {
    let dir = TempDir::new().unwrap();
    {
        let session = seeded_session(&dir);
        session.snapshot().unwrap();
    }

    let mut session = Session::open(config_in(&dir)).unwrap();
    assert_eq!(session.applied(), 10);
    session.inactivate(Level::Disciple, "d1").unwrap();
    let path = session.snapshot().unwrap();
    assert!(path.ends_with("snapshot_000011.json"));

    let snap_dir = &session.config().snapshot_dir;
    assert_eq!(load_snapshot(snap_dir, 10).unwrap().unwrap().nodes.len(), 10);
    let latest = load_latest_snapshot(snap_dir).unwrap().unwrap();
    assert_eq!(latest.sequence, 11);
    assert_eq!(latest.hash, session.current_hash().unwrap());
}

#[test]
fn missing_snapshot_dir_has_no_latest() {
    let dir = TempDir::new().unwrap();
    assert!(load_latest_snapshot(&dir.path().join("nowhere")).unwrap().is_none());
}

// ─────────────────────────────────────────────────────────────
// Drift
// ─────────────────────────────────────────────────────────────

#[test]
fn drift_report_after_inactivation() {
    let dir = TempDir::new().unwrap();
    let mut session = seeded_session(&dir);
    let before = session.nodes().unwrap();
    save_snapshot(&session.config().snapshot_dir, session.applied(), &before).unwrap();

    session.execute(&inactivate(Level::Preacher, "pr1")).unwrap();
    let after = session.nodes().unwrap();

    let snap = load_latest_snapshot(&session.config().snapshot_dir).unwrap().unwrap();
    let report = compare_graphs(&snap.nodes, &after);
    assert!(!report.is_empty());
    assert_eq!(report.node_count_delta, 0);
    assert_eq!(report.active_delta, -1);
    assert_eq!(report.inactivated, vec!["pr1".to_string()]);
    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    assert!(report.relinked.contains(&"fg1".to_string()));
    assert!(report.newly_detached.contains(&"d1".to_string()));
    assert!(report.newly_detached.contains(&"fg1".to_string()));
}

#[test]
fn identical_graphs_have_no_drift() {
    let dir = TempDir::new().unwrap();
    let session = seeded_session(&dir);
    let nodes = session.nodes().unwrap();
    let report = compare_graphs(&nodes, &nodes);
    assert!(report.is_empty());
    assert_eq!(report.detached_delta, 0);
}

#[test]
fn command_replay_is_deterministic() {
    let mut commands = seed_commands();
    commands.push(reassign_pr1_to_sv2());
    commands.push(inactivate(Level::Copastor, "cp1"));
    let hash = verify_determinism(&commands).unwrap();
    assert_eq!(hash.len(), 64);
}

// ─────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────

#[test]
fn config_file_drives_session() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("runtime.toml");
    fs::write(
        &config_path,
        format!(
            "database_path = {:?}\nactor = \"registrar\"\nmax_attempts = 5\n",
            dir.path().join("from_config.db")
        ),
    )
    .unwrap();

    let config = RuntimeConfig::load(&config_path).unwrap();
    assert_eq!(config.max_attempts, 5);
    let mut session = Session::open(config).unwrap();
    let outcome = session.execute(&seed_commands()[0]).unwrap();
    assert_eq!(outcome.node().unwrap().created.by, "registrar");
    assert!(dir.path().join("from_config.db").exists());
}
