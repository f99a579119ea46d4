//! membership-audit
//!
//! Operator tool over a membership database.
//!
//! ## Usage
//!
//! ```bash
//! # Audit every invariant of the stored graph
//! membership-audit --database church.db audit
//!
//! # Apply a JSON array of commands, stopping at the first rejection
//! membership-audit --config runtime.toml apply commands.json
//!
//! # Canonical hash, detached nodes, snapshot
//! membership-audit hash
//! membership-audit detached
//! membership-audit snapshot
//!
//! # Compare the database with the latest snapshot
//! membership-audit drift
//!
//! # Replay a command file twice in memory and compare hashes
//! membership-audit verify commands.json
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};

use membership_engine::Command;
use membership_runtime::drift::{compare_graphs, verify_determinism};
use membership_runtime::snapshot::{load_latest_snapshot, verify_snapshot};
use membership_runtime::{logging, RuntimeConfig, RuntimeError, Session};

#[derive(Parser, Debug)]
#[command(name = "membership-audit")]
#[command(about = "Audit and maintain a church membership hierarchy database")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "MEMBERSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, env = "MEMBERSHIP_DATABASE")]
    database: Option<PathBuf>,

    /// tracing filter used when RUST_LOG is unset
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Check every graph invariant
    Audit,
    /// Apply a JSON array of commands
    Apply { file: PathBuf },
    /// Print the canonical graph hash
    Hash,
    /// List active nodes with a missing link
    Detached,
    /// Write a snapshot of the current graph
    Snapshot,
    /// Compare the database with the latest snapshot
    Drift,
    /// Replay a command file twice and compare hashes
    Verify { file: PathBuf },
}

fn read_commands(file: &Path) -> Result<Vec<Command>, RuntimeError> {
    let content = std::fs::read_to_string(file)?;
    Ok(Command::parse_batch(&content)?)
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(filter) = args.log_filter {
        config.log_filter = filter;
    }
    logging::init(&config.log_filter);

    // Runs without a database.
    if let Action::Verify { file } = &args.command {
        let hash = verify_determinism(&read_commands(file)?)?;
        println!("{}", hash);
        return Ok(());
    }

    let mut session = Session::open(config)?;
    match args.command {
        Action::Audit => {
            if let Err(err) = session.audit() {
                error!(error = %err, "audit failed");
                return Err(err.into());
            }
            println!("ok");
        }
        Action::Apply { file } => {
            let commands = read_commands(&file)?;
            let outcomes = session.run_batch(&commands)?;
            info!(applied = outcomes.len(), "batch applied");
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        Action::Hash => println!("{}", session.current_hash()?),
        Action::Detached => {
            for node in session.detached()? {
                println!("{}\t{}", node.level, node.id);
            }
        }
        Action::Snapshot => {
            let path = session.snapshot()?;
            println!("{}", path.display());
        }
        Action::Drift => {
            let snap = load_latest_snapshot(&session.config().snapshot_dir)?
                .ok_or_else(|| RuntimeError::Config("no snapshot to compare against".into()))?;
            verify_snapshot(&snap)?;
            let report = compare_graphs(&snap.nodes, &session.nodes()?);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Action::Verify { .. } => {}
    }
    Ok(())
}
