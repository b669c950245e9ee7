//! Configuration for a backup run.
//!
//! Two layers: [`BackupConfig`] is the document listing what to back up,
//! [`Settings`] carries everything the command line controls.

use crate::utils::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths to back up and patterns to exclude, as read from the config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Source paths, one transfer each, in document order
    pub paths: Vec<String>,

    /// Glob-style patterns handed to the sync tool as `--exclude`
    pub excludes: Vec<String>,
}

/// On-disk shape of the config document.
#[derive(Debug, Deserialize)]
struct Document {
    backup: Vec<String>,

    #[serde(default)]
    exclude: Vec<String>,
}

impl BackupConfig {
    /// Load the config document at `path`.
    ///
    /// JSON is the default format; a `.toml` extension selects TOML with the
    /// same `backup` / `exclude` keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let document: Document = if is_toml {
            toml::from_str(&content).map_err(|e| malformed(path, e))?
        } else {
            serde_json::from_str(&content).map_err(|e| malformed(path, e))?
        };

        Self::from_document(path, document)
    }

    fn from_document(path: &Path, document: Document) -> Result<Self, ConfigError> {
        let paths: Vec<String> = document
            .backup
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        if paths.is_empty() {
            return Err(ConfigError::EmptyPaths(path.to_path_buf()));
        }

        Ok(Self {
            paths,
            excludes: document.exclude,
        })
    }
}

fn malformed(path: &Path, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Malformed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Where evicted snapshots are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PruneTarget {
    /// Remote store when a server is configured, local store otherwise
    #[default]
    Auto,
    Local,
    Remote,
    Both,
    Off,
}

impl PruneTarget {
    /// Resolve to `(local, remote)` flags for a run.
    pub fn resolve(self, has_server: bool) -> (bool, bool) {
        match self {
            PruneTarget::Auto => (!has_server, has_server),
            PruneTarget::Local => (true, false),
            PruneTarget::Remote => (false, has_server),
            PruneTarget::Both => (true, has_server),
            PruneTarget::Off => (false, false),
        }
    }
}

/// Run-level settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace of the backup series
    pub name: String,

    /// Number of snapshots to retain per namespace
    pub keep: usize,

    /// Remote host; `None` means the store is a local directory
    pub server: Option<String>,

    /// Remote login used for `user@server:` destinations
    pub user: String,

    /// Config document path
    pub config_file: PathBuf,

    /// Destination directory (local, or on the remote host)
    pub store: PathBuf,

    /// Single-instance lock artifact
    pub lock_file: PathBuf,

    /// Sync tool program
    pub rsync_path: String,

    /// Remote shell program used for remote pruning
    pub ssh_path: String,

    /// Per-transfer timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,

    pub prune: PruneTarget,

    /// Host label embedded in snapshot names
    pub host_label: String,
}

// Default values
pub fn default_name() -> String {
    "backup".to_string()
}

pub fn default_keep() -> usize {
    90
}

pub fn default_user() -> String {
    "backup".to_string()
}

pub fn default_lock_file() -> PathBuf {
    std::env::temp_dir().join("incrbkp.pid")
}

pub fn default_rsync_path() -> String {
    "rsync".to_string()
}

pub fn default_ssh_path() -> String {
    "ssh".to_string()
}

pub fn default_host_label() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Settings {
    /// Settings with every optional value at its default.
    pub fn new(config_file: impl Into<PathBuf>, store: impl Into<PathBuf>) -> Self {
        Settings {
            name: default_name(),
            keep: default_keep(),
            server: None,
            user: default_user(),
            config_file: config_file.into(),
            store: store.into(),
            lock_file: default_lock_file(),
            rsync_path: default_rsync_path(),
            ssh_path: default_ssh_path(),
            timeout: None,
            prune: PruneTarget::default(),
            host_label: default_host_label(),
        }
    }
}
