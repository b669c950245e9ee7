//! Utility modules for incrbkp.

pub mod errors;
pub mod logger;

pub use errors::{ConfigError, LockError, Result, RunError, StoreError};
