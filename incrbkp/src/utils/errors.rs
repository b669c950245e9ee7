//! Error types for the backup run.
//!
//! Fatal failures (lock contention, configuration, store listing) surface as
//! [`RunError`]. Per-path transfer failures and per-snapshot prune failures
//! are recorded in the run report instead of propagating.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Backup running, lock file {} exists (owner pid: {})", path.display(), owner.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()))]
    AlreadyRunning { path: PathBuf, owner: Option<i32> },

    #[error("Lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Configuration file {} could not be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Configuration {} lists no backup paths", .0.display())]
    EmptyPaths(PathBuf),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    Status {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    LockContention(LockError),

    #[error(transparent)]
    Lock(LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to list snapshots: {0}")]
    Store(#[from] StoreError),

    #[error("Backup interrupted by shutdown signal")]
    Interrupted,
}

impl From<LockError> for RunError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyRunning { .. } => RunError::LockContention(err),
            LockError::Io { .. } => RunError::Lock(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;
