//! Outcome of one backup run.

use crate::sync::TransferResult;
use crate::utils::RunError;
use std::fmt;

/// Exit code for a completed run.
pub const EXIT_OK: u8 = 0;
/// Exit code for a failed run (errno EPERM, as for missing options).
pub const EXIT_FAILED: u8 = 1;
/// Exit code when another run holds the lock (errno EBUSY).
pub const EXIT_BUSY: u8 = 16;

/// Orchestrator states, in order of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LockAcquired,
    ConfigLoaded,
    SnapshotComputed,
    Transferring,
    Pruning,
    Done,
    /// Another run held the lock; nothing was attempted
    Busy,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::LockAcquired => "lock-acquired",
            RunState::ConfigLoaded => "config-loaded",
            RunState::SnapshotComputed => "snapshot-computed",
            RunState::Transferring => "transferring",
            RunState::Pruning => "pruning",
            RunState::Done => "done",
            RunState::Busy => "busy",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An evicted snapshot that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneFailure {
    pub store: String,
    pub snapshot: String,
    pub error: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub namespace: String,
    pub state: RunState,
    /// Name of the snapshot written by this run
    pub snapshot: Option<String>,
    pub transfers: Vec<TransferResult>,
    /// Snapshot names deleted by retention
    pub evicted: Vec<String>,
    pub prune_failures: Vec<PruneFailure>,
    /// Fatal error, set when the run ended `Busy` or `Failed`
    pub error: Option<RunError>,
}

impl RunReport {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: RunState::Idle,
            snapshot: None,
            transfers: Vec::new(),
            evicted: Vec::new(),
            prune_failures: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn transition(&mut self, next: RunState) {
        tracing::debug!(from = %self.state, to = %next, "Run state change");
        self.state = next;
    }

    pub(crate) fn fail(&mut self, state: RunState, error: RunError) {
        self.transition(state);
        self.error = Some(error);
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn failed_transfers(&self) -> impl Iterator<Item = &TransferResult> {
        self.transfers.iter().filter(|t| !t.success)
    }

    pub fn exit_code(&self) -> u8 {
        match self.state {
            RunState::Done => EXIT_OK,
            RunState::Busy => EXIT_BUSY,
            _ => EXIT_FAILED,
        }
    }

    /// One-line run status.
    pub fn summary(&self) -> String {
        let ok = self.transfers.len() - self.failed_transfers().count();
        let mut line = format!(
            "Backup {} {}: {}/{} paths transferred, {} snapshots pruned",
            self.namespace,
            self.state,
            ok,
            self.transfers.len(),
            self.evicted.len()
        );
        if let Some(snapshot) = &self.snapshot {
            line.push_str(&format!(", snapshot {snapshot}"));
        }
        if !self.prune_failures.is_empty() {
            line.push_str(&format!(", {} prune failures", self.prune_failures.len()));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" ({error})"));
        }
        line
    }
}
