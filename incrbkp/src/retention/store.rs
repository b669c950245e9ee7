//! Snapshot stores: where existing snapshots are listed and removed.

use crate::sync::runner::{CommandRunner, Invocation};
use crate::utils::StoreError;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub trait SnapshotStore {
    /// Human-readable location, for logs.
    fn location(&self) -> String;

    /// Entry names directly under the store root.
    fn list(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Delete one entry (recursively) from the store root.
    fn remove(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn list_dir(root: &Path) -> Result<Vec<String>, StoreError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| StoreError::Io {
            path: root.to_path_buf(),
            source: e.into(),
        })?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn remove_entry(path: &Path) -> Result<(), StoreError> {
    let io_err = |source: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = std::fs::symlink_metadata(path).map_err(io_err)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path).map_err(io_err)
    } else {
        std::fs::remove_file(path).map_err(io_err)
    }
}

fn join_error(path: &Path, e: tokio::task::JoinError) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source: io::Error::other(e),
    }
}

impl SnapshotStore for LocalStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_dir(&root))
            .await
            .map_err(|e| join_error(&self.root, e))?
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.root.join(name);
        let target = path.clone();
        tokio::task::spawn_blocking(move || remove_entry(&target))
            .await
            .map_err(|e| join_error(&path, e))?
    }
}

/// A store on a remote host, reached through the remote shell tool.
pub struct RemoteStore<'a, R> {
    runner: &'a R,
    ssh: String,
    user: String,
    server: String,
    root: PathBuf,
}

/// Quote for the remote shell: ssh joins its arguments into one command line.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl<'a, R: CommandRunner + Sync> RemoteStore<'a, R> {
    pub fn new(runner: &'a R, ssh: &str, user: &str, server: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            ssh: ssh.to_string(),
            user: user.to_string(),
            server: server.to_string(),
            root: root.into(),
        }
    }

    fn remote(&self, command: &[&str], path: &Path) -> Invocation {
        Invocation::new(&self.ssh)
            .args(["-o", "BatchMode=yes"])
            .arg(format!("{}@{}", self.user, self.server))
            .args(command)
            .arg("--")
            .arg(shell_quote(&path.to_string_lossy()))
    }

    async fn run(&self, invocation: Invocation) -> Result<String, StoreError> {
        let output = self
            .runner
            .output(&invocation)
            .await
            .map_err(|source| StoreError::Command {
                program: self.ssh.clone(),
                source,
            })?;

        if !output.success() {
            return Err(StoreError::Status {
                program: self.ssh.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl<'a, R: CommandRunner + Sync> SnapshotStore for RemoteStore<'a, R> {
    fn location(&self) -> String {
        format!("{}@{}:{}", self.user, self.server, self.root.display())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let stdout = self.run(self.remote(&["ls", "-1A"], &self.root)).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.run(self.remote(&["rm", "-rf"], &self.root.join(name)))
            .await
            .map(|_| ())
    }
}
