//! incrbkp - Main entry point
//!
//! Incremental backups of configured paths through rsync.

use clap::error::ErrorKind;
use clap::Parser;
use incrbkp::daemon::ShutdownCoordinator;
use incrbkp::executor::report::{EXIT_FAILED, EXIT_OK};
use incrbkp::sync::ProcessRunner;
use incrbkp::{utils, BackupOrchestrator, PruneTarget, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Missing `--config` or `--store` (errno EPERM).
const EXIT_MISSING_OPTION: u8 = 1;
/// Any other argument error (errno EIO).
const EXIT_USAGE: u8 = 5;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backup namespace
    #[arg(short, long, default_value = "backup")]
    name: String,

    /// Number of backups to keep before deleting
    #[arg(short, long, default_value_t = 90)]
    keep: usize,

    /// Server to keep the backup on (e.g. 10.1.1.2)
    #[arg(short, long)]
    server: Option<String>,

    /// Configuration file with backup paths
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Directory to store the backups in, on the server when one is given
    #[arg(short = 't', long, value_name = "DIR")]
    store: PathBuf,

    /// Remote username used to ssh for backups
    #[arg(short, long, default_value = "backup")]
    user: String,

    /// Lock file guarding against concurrent runs
    #[arg(long, value_name = "FILE")]
    lock_file: Option<PathBuf>,

    /// Sync tool to run for each path
    #[arg(long, value_name = "PROGRAM", default_value = "rsync")]
    rsync_path: String,

    /// Remote shell used to prune snapshots on the server
    #[arg(long, value_name = "PROGRAM", default_value = "ssh")]
    ssh_path: String,

    /// Per-transfer timeout in seconds (default: wait indefinitely)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Where to delete snapshots beyond --keep
    #[arg(long, value_enum, default_value_t = PruneTarget::Auto)]
    prune: PruneTarget,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_settings(self) -> Settings {
        let mut settings = Settings::new(self.config, self.store);
        settings.name = self.name;
        settings.keep = self.keep;
        settings.server = self.server;
        settings.user = self.user;
        settings.rsync_path = self.rsync_path;
        settings.ssh_path = self.ssh_path;
        settings.timeout = self.timeout.map(Duration::from_secs);
        settings.prune = self.prune;
        if let Some(lock_file) = self.lock_file {
            settings.lock_file = lock_file;
        }
        settings
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                ErrorKind::MissingRequiredArgument => EXIT_MISSING_OPTION,
                _ => EXIT_USAGE,
            };
            e.print()?;
            return Ok(ExitCode::from(code));
        }
    };

    // Initialize logging
    if let Err(e) = utils::logger::init(&args.log_level, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e:#}");
        return Ok(ExitCode::from(EXIT_FAILED));
    }

    // Signal handlers go in before the lock is taken
    let shutdown = ShutdownCoordinator::new();
    shutdown.install()?;

    let settings = args.into_settings();
    tracing::info!(
        "Starting incrbkp v{} (namespace: {}, keep: {})",
        env!("CARGO_PKG_VERSION"),
        settings.name,
        settings.keep
    );

    let orchestrator = BackupOrchestrator::new(settings, ProcessRunner);
    let report = orchestrator.run(shutdown.token()).await;

    println!("{}", report.summary());
    Ok(ExitCode::from(report.exit_code()))
}
