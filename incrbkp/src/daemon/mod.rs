//! Process-level coordination: the single-instance lock and signal handling.

pub mod lock;
pub mod shutdown;

pub use lock::RunLock;
pub use shutdown::ShutdownCoordinator;
