//! Configuration for the membership runtime

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use membership_engine::EngineOptions;

use crate::error::{Result, RuntimeError};

/// Runtime configuration, read from TOML. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Attempts per command when the store reports a retryable conflict
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Directory for graph snapshots
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Take a snapshot every N applied commands (0 = never)
    #[serde(default)]
    pub snapshot_interval: u64,

    /// tracing filter used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Recorded as the author of every write
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Audit the whole graph before each commit
    #[serde(default = "default_true")]
    pub audit_after_write: bool,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("membership.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_log_filter() -> String {
    "membership_runtime=info,membership_engine=info".to_string()
}

fn default_actor() -> String {
    "system".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_attempts: default_max_attempts(),
            snapshot_dir: default_snapshot_dir(),
            snapshot_interval: 0,
            log_filter: default_log_filter(),
            actor: default_actor(),
            audit_after_write: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RuntimeError::Config("max_attempts must be at least 1".into()));
        }
        if self.actor.trim().is_empty() {
            return Err(RuntimeError::Config("actor must not be empty".into()));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            actor: self.actor.clone(),
            audit_after_write: self.audit_after_write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(config.database_path, PathBuf::from("membership.db"));
        assert_eq!(config.max_attempts, 3);
        assert!(config.audit_after_write);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::from_toml(
            r#"
            database_path = "/var/lib/membership/graph.db"
            actor = "secretaria"
            snapshot_interval = 10
            audit_after_write = false
            "#,
        )
        .unwrap();
        assert_eq!(config.actor, "secretaria");
        assert_eq!(config.snapshot_interval, 10);
        let options = config.engine_options();
        assert!(!options.audit_after_write);
        assert_eq!(options.actor, "secretaria");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = RuntimeConfig::from_toml("max_attempts = 0").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(RuntimeConfig::from_toml("max_attempts = \"three\"").is_err());
    }
}
