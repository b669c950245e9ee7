//! Backup run orchestrator.
//!
//! Drives one run through its states:
//! - take the single-instance lock
//! - load the config document
//! - name the snapshot
//! - transfer every configured path, tolerating per-path failures
//! - apply retention to the selected stores
//!
//! The lock guard lives for the whole run body, so it is released on every
//! exit path after acquisition, including cancellation.

pub mod report;

use crate::config::{BackupConfig, Settings};
use crate::daemon::RunLock;
use crate::retention::{compute_evictions, retention_set, LocalStore, RemoteStore, SnapshotStore};
use crate::snapshot::SnapshotId;
use crate::sync::{CommandRunner, Destination, TransferInvoker};
use crate::utils::{ConfigError, LockError, RunError};
use chrono::NaiveDateTime;
use report::PruneFailure;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use report::{RunReport, RunState};

/// Main backup orchestrator
pub struct BackupOrchestrator<R> {
    settings: Settings,
    runner: R,
}

impl<R: CommandRunner + Sync> BackupOrchestrator<R> {
    pub fn new(settings: Settings, runner: R) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run a backup stamped with the current local time.
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        self.run_at(chrono::Local::now().naive_local(), cancel).await
    }

    /// Run a backup stamped with `now`.
    pub async fn run_at(&self, now: NaiveDateTime, cancel: CancellationToken) -> RunReport {
        let mut report = RunReport::new(&self.settings.name);

        let lock = match RunLock::acquire(&self.settings.lock_file) {
            Ok(lock) => lock,
            Err(e @ LockError::AlreadyRunning { .. }) => {
                warn!("{}, exiting", e);
                report.fail(RunState::Busy, e.into());
                return report;
            }
            Err(e) => {
                error!("Failed to acquire lock: {}", e);
                report.fail(RunState::Failed, e.into());
                return report;
            }
        };
        report.transition(RunState::LockAcquired);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Interrupted),
            result = self.run_locked(now, &mut report) => result,
        };

        match outcome {
            Ok(()) => report.transition(RunState::Done),
            Err(e) => {
                error!(state = %report.state, "Incremental backup failed: {}", e);
                report.fail(RunState::Failed, e);
            }
        }

        if let Err(e) = lock.release() {
            warn!(lock = %self.settings.lock_file.display(), "Failed to remove lock file: {}", e);
        }

        for failed in report.failed_transfers() {
            warn!(path = %failed.path, code = ?failed.exit_code, "Path not fully backed up");
        }
        info!("{}", report.summary());
        report
    }

    async fn run_locked(&self, now: NaiveDateTime, report: &mut RunReport) -> Result<(), RunError> {
        let settings = &self.settings;

        let config = match BackupConfig::load(&settings.config_file) {
            Ok(config) => config,
            Err(ConfigError::EmptyPaths(path)) => {
                warn!(config = %path.display(), "No backup paths configured, nothing to do");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        report.transition(RunState::ConfigLoaded);

        let snapshot = SnapshotId::new(now, &settings.host_label, &settings.name, settings.keep);
        let destination =
            Destination::for_snapshot(&settings.store, &snapshot, settings.server.as_deref(), &settings.user);
        report.snapshot = Some(snapshot.name());
        report.transition(RunState::SnapshotComputed);
        info!(
            snapshot = %snapshot,
            paths = config.paths.len(),
            excludes = config.excludes.len(),
            "Starting backup to {}",
            destination
        );

        report.transition(RunState::Transferring);
        let invoker = TransferInvoker::new(&self.runner, &settings.rsync_path).with_timeout(settings.timeout);
        for path in &config.paths {
            let result = invoker.transfer(path, &destination, &config.excludes).await;
            report.transfers.push(result);
        }

        report.transition(RunState::Pruning);
        self.prune(report).await
    }

    async fn prune(&self, report: &mut RunReport) -> Result<(), RunError> {
        let settings = &self.settings;
        let (local, remote) = settings.prune.resolve(settings.server.is_some());

        if !local && !remote {
            debug!("Retention disabled for this run");
            return Ok(());
        }

        if local {
            self.prune_store(&LocalStore::new(&settings.store), report).await?;
        }
        if let (true, Some(server)) = (remote, settings.server.as_deref()) {
            let store = RemoteStore::new(&self.runner, &settings.ssh_path, &settings.user, server, &settings.store);
            self.prune_store(&store, report).await?;
        }
        Ok(())
    }

    async fn prune_store<S: SnapshotStore>(&self, store: &S, report: &mut RunReport) -> Result<(), RunError> {
        let settings = &self.settings;
        let names = store.list().await?;
        let existing = retention_set(&names, &settings.host_label, &settings.name);
        let evictions = compute_evictions(&existing, settings.keep);

        info!(
            store = %store.location(),
            existing = existing.len(),
            keep = settings.keep,
            evicting = evictions.len(),
            "Applying retention"
        );

        for snapshot in evictions {
            let name = snapshot.name();
            match store.remove(&name).await {
                Ok(()) => {
                    info!(snapshot = %name, "Pruned snapshot");
                    report.evicted.push(name);
                }
                Err(e) => {
                    warn!(snapshot = %name, "Failed to prune snapshot: {}", e);
                    report.prune_failures.push(PruneFailure {
                        store: store.location(),
                        snapshot: name,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PruneTarget;
    use crate::sync::{CommandOutput, Invocation};
    use chrono::NaiveDate;
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records every invocation; scripted replies stand in for rsync and ssh.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Invocation>>,
        /// Source paths whose transfer exits with code 23
        fail_paths: Vec<String>,
        /// Create the local destination directory like rsync would
        materialize: bool,
        /// Remote `ls` output; `None` makes the listing fail
        listing: Option<String>,
        fail_remove: bool,
        hang: bool,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        fn transfers(&self) -> Vec<Invocation> {
            self.calls().into_iter().filter(|c| c.program == "rsync").collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        async fn status(&self, invocation: &Invocation, _timeout: Option<Duration>) -> io::Result<Option<i32>> {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.hang {
                std::future::pending::<()>().await;
            }

            let args = invocation.args_lossy();
            let source = &args[args.len() - 2];
            if self.materialize {
                fs::create_dir_all(&args[args.len() - 1])?;
            }
            Ok(Some(if self.fail_paths.contains(source) { 23 } else { 0 }))
        }

        async fn output(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());

            if invocation.args_lossy().iter().any(|a| a == "ls") {
                return Ok(match &self.listing {
                    Some(stdout) => CommandOutput {
                        code: Some(0),
                        stdout: stdout.clone(),
                        stderr: String::new(),
                    },
                    None => CommandOutput {
                        code: Some(255),
                        stdout: String::new(),
                        stderr: "ssh: connect to host 10.1.1.2 port 22: Connection refused".into(),
                    },
                });
            }
            Ok(CommandOutput {
                code: Some(if self.fail_remove { 1 } else { 0 }),
                ..Default::default()
            })
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap()
    }

    fn old_snapshot(day: u32) -> String {
        format!("00.testhost.202405{day:02}023000.nightly")
    }

    const SNAPSHOT: &str = "00.testhost.20240601023000.nightly";

    fn settings(dir: &TempDir, config: &str) -> Settings {
        let config_file = dir.path().join("backup.json");
        fs::write(&config_file, config).unwrap();
        let store = dir.path().join("store");
        fs::create_dir_all(&store).unwrap();

        let mut settings = Settings::new(config_file, store);
        settings.name = "nightly".into();
        settings.keep = 5;
        settings.host_label = "testhost".into();
        settings.lock_file = dir.path().join("incrbkp.pid");
        settings
    }

    async fn run(settings: Settings, runner: RecordingRunner) -> (RunReport, BackupOrchestrator<RecordingRunner>) {
        let orchestrator = BackupOrchestrator::new(settings, runner);
        let report = orchestrator.run_at(now(), CancellationToken::new()).await;
        (report, orchestrator)
    }

    fn destination_of(invocation: &Invocation) -> String {
        invocation.args_lossy().last().unwrap().clone()
    }

    #[tokio::test]
    async fn test_one_transfer_per_path() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, r#"{"backup": ["/etc", "/srv", "/home"]}"#);
        let store = settings.store.clone();

        let (report, orchestrator) = run(settings, RecordingRunner::default()).await;

        assert_eq!(report.state, RunState::Done);
        let transfers = orchestrator.runner.transfers();
        assert_eq!(transfers.len(), 3);
        let expected = store.join(SNAPSHOT).display().to_string();
        for (invocation, source) in transfers.iter().zip(["/etc", "/srv", "/home"]) {
            let args = invocation.args_lossy();
            assert_eq!(args[args.len() - 2], source);
            assert_eq!(destination_of(invocation), expected);
        }
    }

    #[tokio::test]
    async fn test_local_scenario() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, r#"{"backup": ["/etc"], "exclude": ["*.tmp"]}"#);
        settings.store = "/backups".into();
        settings.prune = PruneTarget::Off;

        let (report, orchestrator) = run(settings, RecordingRunner::default()).await;

        assert!(report.is_success());
        assert_eq!(report.snapshot.as_deref(), Some(SNAPSHOT));
        let transfers = orchestrator.runner.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(
            transfers[0].args_lossy(),
            vec![
                "-avR",
                "--ignore-errors",
                "--delete",
                "--delete-excluded",
                "--exclude",
                "*.tmp",
                "/etc",
                "/backups/00.testhost.20240601023000.nightly",
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_scenario() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, r#"{"backup": ["/etc"], "exclude": ["*.tmp"]}"#);
        settings.store = "/backups".into();
        settings.server = Some("10.1.1.2".into());

        let runner = RecordingRunner {
            listing: Some(format!("{SNAPSHOT}\n")),
            ..Default::default()
        };
        let (report, orchestrator) = run(settings, runner).await;

        assert!(report.is_success());
        let transfers = orchestrator.runner.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(
            destination_of(&transfers[0]),
            "backup@10.1.1.2:/backups/00.testhost.20240601023000.nightly"
        );
    }

    #[tokio::test]
    async fn test_held_lock_is_busy_with_zero_transfers() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, r#"{"backup": ["/etc"]}"#);
        let lock_file = settings.lock_file.clone();
        fs::write(&lock_file, "4242\n").unwrap();

        let (report, orchestrator) = run(settings, RecordingRunner::default()).await;

        assert_eq!(report.state, RunState::Busy);
        assert!(matches!(report.error, Some(RunError::LockContention(_))));
        assert_eq!(report.exit_code(), report::EXIT_BUSY);
        assert!(orchestrator.runner.calls().is_empty());
        // Someone else's lock is never removed.
        assert_eq!(fs::read_to_string(&lock_file).unwrap(), "4242\n");
    }

    #[tokio::test]
    async fn test_lock_released_after_success_and_transfer_failure() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, r#"{"backup": ["/etc", "/srv"]}"#);
        let lock_file = settings.lock_file.clone();

        let runner = RecordingRunner {
            fail_paths: vec!["/etc".into()],
            ..Default::default()
        };
        let (report, orchestrator) = run(settings, runner).await;

        // A failed path does not stop the next one.
        assert_eq!(report.state, RunState::Done);
        assert_eq!(orchestrator.runner.transfers().len(), 2);
        assert_eq!(report.failed_transfers().count(), 1);
        assert_eq!(report.transfers[0].exit_code, Some(23));
        assert!(report.transfers[1].success);
        assert!(!lock_file.exists());

        let (report, _) = run(orchestrator.settings.clone(), RecordingRunner::default()).await;
        assert!(report.is_success());
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_missing_backup_key_fails_without_transfers() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, r#"{"exclude": ["*.tmp"]}"#);
        let lock_file = settings.lock_file.clone();

        let (report, orchestrator) = run(settings, RecordingRunner::default()).await;

        assert_eq!(report.state, RunState::Failed);
        assert!(matches!(
            report.error,
            Some(RunError::Config(ConfigError::Malformed { .. }))
        ));
        assert!(orchestrator.runner.calls().is_empty());
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_missing_config_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, "{}");
        settings.config_file = dir.path().join("absent.json");

        let (report, _) = run(settings, RecordingRunner::default()).await;

        assert!(matches!(
            report.error,
            Some(RunError::Config(ConfigError::NotFound(_)))
        ));
        assert_eq!(report.exit_code(), report::EXIT_FAILED);
    }

    #[tokio::test]
    async fn test_empty_paths_is_noop_success() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, r#"{"backup": []}"#);
        let lock_file = settings.lock_file.clone();

        let (report, orchestrator) = run(settings, RecordingRunner::default()).await;

        assert_eq!(report.state, RunState::Done);
        assert!(report.snapshot.is_none());
        assert!(orchestrator.runner.calls().is_empty());
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_local_retention_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, r#"{"backup": ["/etc"]}"#);
        settings.keep = 3;
        let store = settings.store.clone();
        for day in 1..=5 {
            fs::create_dir_all(store.join(old_snapshot(day))).unwrap();
        }
        fs::create_dir_all(store.join("00.otherhost.20240501023000.nightly")).unwrap();
        fs::create_dir_all(store.join("00.testhost.20240501023000.weekly")).unwrap();

        let runner = RecordingRunner {
            materialize: true,
            ..Default::default()
        };
        let (report, _) = run(settings, runner).await;

        assert!(report.is_success());
        assert_eq!(
            report.evicted,
            vec![old_snapshot(3), old_snapshot(2), old_snapshot(1)]
        );

        let mut remaining: Vec<String> = fs::read_dir(&store)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "00.otherhost.20240501023000.nightly".to_string(),
                "00.testhost.20240501023000.weekly".to_string(),
                old_snapshot(4),
                old_snapshot(5),
                SNAPSHOT.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_retention_and_prune_failures() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, r#"{"backup": ["/etc"]}"#);
        settings.keep = 1;
        settings.server = Some("10.1.1.2".into());
        settings.store = "/backups".into();

        let listing = [old_snapshot(30), SNAPSHOT.to_string(), "lost+found".to_string()].join("\n");
        let runner = RecordingRunner {
            listing: Some(listing),
            fail_remove: true,
            ..Default::default()
        };
        let (report, orchestrator) = run(settings, runner).await;

        assert_eq!(report.state, RunState::Done);
        assert!(report.evicted.is_empty());
        assert_eq!(report.prune_failures.len(), 1);
        assert_eq!(report.prune_failures[0].snapshot, old_snapshot(30));
        assert_eq!(report.prune_failures[0].store, "backup@10.1.1.2:/backups");

        let removals: Vec<Invocation> = orchestrator
            .runner
            .calls()
            .into_iter()
            .filter(|c| c.args_lossy().iter().any(|a| a == "rm"))
            .collect();
        assert_eq!(removals.len(), 1);
        assert_eq!(
            destination_of(&removals[0]),
            format!("'/backups/{}'", old_snapshot(30))
        );
    }

    #[tokio::test]
    async fn test_keep_zero_prunes_current_snapshot_too() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, r#"{"backup": ["/etc"]}"#);
        settings.keep = 0;
        let store = settings.store.clone();

        let runner = RecordingRunner {
            materialize: true,
            ..Default::default()
        };
        let (report, _) = run(settings, runner).await;

        assert_eq!(report.evicted, vec![SNAPSHOT.to_string()]);
        assert!(!store.join(SNAPSHOT).exists());
    }

    #[tokio::test]
    async fn test_store_listing_failure_fails_run() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, r#"{"backup": ["/etc"]}"#);
        settings.server = Some("10.1.1.2".into());
        let lock_file = settings.lock_file.clone();

        let (report, orchestrator) = run(settings, RecordingRunner::default()).await;

        assert_eq!(report.state, RunState::Failed);
        assert!(matches!(report.error, Some(RunError::Store(_))));
        assert_eq!(report.transfers.len(), 1);
        assert_eq!(orchestrator.runner.transfers().len(), 1);
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_cancellation_releases_lock() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, r#"{"backup": ["/etc", "/srv"]}"#);
        let lock_file = settings.lock_file.clone();

        let orchestrator = BackupOrchestrator::new(
            settings,
            RecordingRunner {
                hang: true,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = orchestrator.run_at(now(), cancel).await;

        assert_eq!(report.state, RunState::Failed);
        assert!(matches!(report.error, Some(RunError::Interrupted)));
        assert_eq!(orchestrator.runner.transfers().len(), 1);
        assert!(!Path::new(&lock_file).exists());
    }
}
