//! Delegation to the external sync tool.
//!
//! - [`runner`]: child-process execution behind the `CommandRunner` seam
//! - [`transfer`]: per-path argument vectors and results

pub mod runner;
pub mod transfer;

pub use runner::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use transfer::{Destination, TransferInvoker, TransferResult};
