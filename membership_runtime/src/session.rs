//! Session manager: a coordinator bound to one SQLite database.
//!
//! Commands run one at a time through the coordinator. A command that
//! fails with a retryable storage error (lock contention, a lost
//! allocation race on the unique code index) is re-planned from scratch
//! up to `max_attempts` times; every other error is returned as is and
//! leaves the database untouched.
//!
//! Order per command:
//!   1. coordinator.execute(command): validate, plan, commit atomically
//!   2. applied counter bumped, only if step 1 succeeded
//!   3. snapshot if interval reached

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use membership_engine::hashing::canonical_hash;
use membership_engine::invariants::audit_nodes;
use membership_engine::{
    Command, Coordinator, EngineError, Level, Node, NodeDraft, Outcome, ScopeKey, StorageError,
};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::snapshot;
use crate::sqlite_store::SqliteGraphStore;

pub struct Session {
    engine: Coordinator<SqliteGraphStore>,
    config: RuntimeConfig,
    applied: u64,
}

impl Session {
    /// Open (or create) the database named by `config`. The command
    /// sequence resumes from the latest snapshot on disk.
    pub fn open(config: RuntimeConfig) -> Result<Self> {
        let store = SqliteGraphStore::open(&config.database_path, config.busy_timeout())?;
        let applied = snapshot::latest_sequence(&config.snapshot_dir)?.unwrap_or(0);
        info!(database = %config.database_path.display(), applied, "session opened");
        let mut session = Self::with_store(store, config);
        session.applied = applied;
        Ok(session)
    }

    pub fn with_store(store: SqliteGraphStore, config: RuntimeConfig) -> Self {
        Self {
            engine: Coordinator::with_options(store, config.engine_options()),
            config,
            applied: 0,
        }
    }

    /// Run one command, retrying retryable storage failures.
    pub fn execute(&mut self, command: &Command) -> Result<Outcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        let outcome = loop {
            match self.engine.execute(command.clone()) {
                Ok(outcome) => break outcome,
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        command = command.name(),
                        attempt,
                        error = %err,
                        "retryable failure, re-planning"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.applied += 1;
        debug!(command = command.name(), applied = self.applied, "command applied");

        let interval = self.config.snapshot_interval;
        if interval > 0 && self.applied % interval == 0 {
            self.snapshot()?;
        }
        Ok(outcome)
    }

    pub fn create(&mut self, level: Level, draft: NodeDraft, superior_id: Option<&str>) -> Result<Node> {
        let command = Command::Create {
            level,
            draft,
            superior_id: superior_id.map(str::to_string),
        };
        returned_node(self.execute(&command)?)
    }

    pub fn reassign(
        &mut self,
        level: Level,
        id: &str,
        superior_id: &str,
        new_scope: Option<ScopeKey>,
    ) -> Result<Node> {
        let command = Command::Reassign {
            level,
            id: id.to_string(),
            superior_id: superior_id.to_string(),
            new_scope,
        };
        returned_node(self.execute(&command)?)
    }

    pub fn inactivate(&mut self, level: Level, id: &str) -> Result<()> {
        self.execute(&Command::Inactivate {
            level,
            id: id.to_string(),
        })?;
        Ok(())
    }

    /// Run commands in order, stopping at the first failure. Commands
    /// before the failing one stay committed.
    pub fn run_batch(&mut self, commands: &[Command]) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            match self.execute(command) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(index, command = command.name(), error = %err, "batch stopped");
                    return Err(err);
                }
            }
        }
        Ok(outcomes)
    }

    pub fn nodes(&self) -> Result<Vec<Node>> {
        Ok(self.engine.store().load_all()?)
    }

    pub fn current_hash(&self) -> Result<String> {
        Ok(canonical_hash(&self.nodes()?)?)
    }

    /// Full invariant audit of the stored graph.
    pub fn audit(&self) -> Result<()> {
        let nodes = self.nodes()?;
        audit_nodes(&nodes).map_err(EngineError::from)?;
        info!(nodes = nodes.len(), "audit passed");
        Ok(())
    }

    pub fn detached(&self) -> Result<Vec<Node>> {
        Ok(self.engine.detached()?)
    }

    /// Write a snapshot of the current graph to the configured directory.
    pub fn snapshot(&self) -> Result<PathBuf> {
        snapshot::save_snapshot(&self.config.snapshot_dir, self.applied, &self.nodes()?)
    }

    /// Sequence of the last applied command. Numbers snapshots.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator<SqliteGraphStore> {
        &self.engine
    }
}

fn returned_node(outcome: Outcome) -> Result<Node> {
    outcome
        .into_node()
        .ok_or_else(|| EngineError::InvalidInput("command returned no node".into()).into())
}

/// Thread-safe session handle using Mutex.
pub struct SharedSession {
    inner: Mutex<Session>,
}

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Session>> {
        self.inner
            .lock()
            .map_err(|e| RuntimeError::Storage(StorageError::lock(format!("session lock poisoned: {}", e))))
    }

    /// Execute under lock.
    pub fn execute(&self, command: &Command) -> Result<Outcome> {
        self.lock()?.execute(command)
    }

    pub fn current_hash(&self) -> Result<String> {
        self.lock()?.current_hash()
    }

    pub fn applied(&self) -> Result<u64> {
        Ok(self.lock()?.applied())
    }
}
