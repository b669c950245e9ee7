//! Per-path transfer through the external sync tool.

use super::runner::{CommandRunner, Invocation};
use crate::snapshot::SnapshotId;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Archive mode with relative paths, mirroring deletions, tolerating
/// per-file errors.
const BASE_FLAGS: [&str; 4] = ["-avR", "--ignore-errors", "--delete", "--delete-excluded"];

/// Where one snapshot is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    Remote {
        user: String,
        server: String,
        path: PathBuf,
    },
}

impl Destination {
    /// Snapshot directory under `store`, on `server` when one is configured.
    pub fn for_snapshot(store: &Path, snapshot: &SnapshotId, server: Option<&str>, user: &str) -> Self {
        let path = store.join(snapshot.name());
        match server {
            Some(server) => Destination::Remote {
                user: user.to_string(),
                server: server.to_string(),
                path,
            },
            None => Destination::Local(path),
        }
    }

    /// Rendered as the sync tool's destination argument.
    pub fn to_arg(&self) -> OsString {
        match self {
            Destination::Local(path) => path.clone().into_os_string(),
            Destination::Remote { user, server, path } => {
                let mut arg = OsString::from(format!("{user}@{server}:"));
                arg.push(path.as_os_str());
                arg
            }
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_arg().to_string_lossy())
    }
}

/// Outcome of one path's transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub path: String,
    pub success: bool,
    /// `None` when the tool could not be started, was killed, or timed out
    pub exit_code: Option<i32>,
}

/// Builds and runs one sync invocation per source path.
pub struct TransferInvoker<'a, R> {
    runner: &'a R,
    program: String,
    timeout: Option<Duration>,
}

impl<'a, R: CommandRunner> TransferInvoker<'a, R> {
    pub fn new(runner: &'a R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Argument vector for one path.
    pub fn build(&self, path: &str, destination: &Destination, excludes: &[String]) -> Invocation {
        let mut invocation = Invocation::new(&self.program).args(BASE_FLAGS);
        for pattern in excludes {
            invocation = invocation.arg("--exclude").arg(pattern);
        }
        invocation.arg(path).arg(destination.to_arg())
    }

    /// Transfer `path` to `destination`. Failures are logged and reported in
    /// the result, never returned as errors.
    pub async fn transfer(&self, path: &str, destination: &Destination, excludes: &[String]) -> TransferResult {
        let invocation = self.build(path, destination, excludes);
        debug!("Running: {}", invocation);

        let exit_code = match self.runner.status(&invocation, self.timeout).await {
            Ok(code) => code,
            Err(e) => {
                error!(path, "Failed to run {}: {}", self.program, e);
                return TransferResult {
                    path: path.to_string(),
                    success: false,
                    exit_code: None,
                };
            }
        };

        let success = exit_code == Some(0);
        if success {
            info!(path, destination = %destination, "Transfer complete");
        } else {
            match exit_code {
                Some(code) => warn!(path, code, "Transfer failed, continuing"),
                None => warn!(path, "Transfer terminated by signal, continuing"),
            }
        }

        TransferResult {
            path: path.to_string(),
            success,
            exit_code,
        }
    }
}
