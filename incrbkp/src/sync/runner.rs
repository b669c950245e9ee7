//! Child-process execution.
//!
//! External tools are always started with an explicit argument vector, never
//! through a shell, so path and pattern content cannot be interpreted.
//! [`CommandRunner`] is the seam the orchestrator is tested through.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Arguments as lossy strings, for logs and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait CommandRunner {
    /// Run with inherited stdio and wait for the exit code.
    ///
    /// Returns `Ok(None)` when the child died from a signal and an error of
    /// kind [`io::ErrorKind::TimedOut`] when `timeout` elapsed first.
    fn status(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> impl Future<Output = io::Result<Option<i32>>> + Send;

    /// Run with captured stdout/stderr.
    fn output(&self, invocation: &Invocation) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Runs commands as real child processes.
///
/// Children are killed when their future is dropped, so cancelling a run
/// does not leave a transfer behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn status(&self, invocation: &Invocation, timeout: Option<Duration>) -> io::Result<Option<i32>> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .kill_on_drop(true)
            .spawn()?;

        let status = match timeout {
            None => child.wait().await?,
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill timed out {}: {}", invocation.program, e);
                        }
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("{} timed out after {}s", invocation.program, limit.as_secs()),
                        ));
                    }
                }
            }
        };

        Ok(status.code())
    }

    async fn output(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
