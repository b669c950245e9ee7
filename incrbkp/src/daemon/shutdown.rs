//! Shutdown handling for SIGTERM and SIGINT.
//!
//! Handlers are installed before the lock is taken. A signal cancels the run
//! token instead of killing the process, so the run unwinds and removes its
//! lock file.

use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled on the first shutdown signal
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Install SIGINT and SIGTERM handlers. Must be called inside a runtime.
    pub fn install(&self) -> io::Result<()> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let token = self.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => {
                    info!("Received SIGINT (Ctrl+C), stopping backup run...");
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM, stopping backup run...");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        });

        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
