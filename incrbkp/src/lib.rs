//! incrbkp library
//!
//! Namespaced, timestamped incremental backups: one rsync invocation per
//! configured path into `{index}.{host}.{timestamp}.{namespace}`, guarded by a
//! single-instance lock, followed by count-based retention.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod retention;
pub mod snapshot;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupConfig, PruneTarget, Settings};
pub use executor::{BackupOrchestrator, RunReport, RunState};
pub use snapshot::SnapshotId;
pub use utils::errors::RunError;
pub type Result<T> = std::result::Result<T, RunError>;
