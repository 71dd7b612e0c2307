//! Remote command execution and file transfer.
//!
//! A [`RemoteSession`] runs self-contained shell command lines on the
//! production host and moves files over the same connection. It keeps no
//! working directory between calls: commands that need one carry their own
//! `cd <dir> &&` prefix (see [`crate::shell::RemoteCommand::cd`]).
//!
//! # Module Structure
//! - `openssh`: implementation on top of the system OpenSSH client with a
//!   multiplexed control connection

mod openssh;

pub use openssh::OpenSshSession;

use async_trait::async_trait;
use std::path::Path;

use crate::Result;
use crate::shell::RemoteCommand;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
}

impl CommandOutput {
    /// Output of a command that exited 0 with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            status: Some(0),
        }
    }

    /// Output of a command that exited with `code` and the given stderr.
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            status: Some(code),
        }
    }

    /// Whether the command exited 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Best single-line explanation of a failure: stderr, else stdout, else
    /// the exit status.
    pub fn summary(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if !stderr.is_empty() {
            return stderr;
        }
        let stdout = String::from_utf8_lossy(&self.stdout).trim().to_string();
        if !stdout.is_empty() {
            return stdout;
        }
        match self.status {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A connection to the remote host.
///
/// Implementations are acquired once per pipeline run and closed on every
/// exit path; the orchestrator calls [`RemoteSession::close`] itself.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Runs a command line and captures its output.
    ///
    /// A non-zero remote exit is returned as output, not as an error, so the
    /// caller can classify it.
    ///
    /// # Errors
    /// Returns a connection error if the command could not be delivered.
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput>;

    /// Downloads `remote_path` to `local_path`, overwriting it.
    ///
    /// # Errors
    /// Returns a transfer error if the download fails.
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Deletes `remote_path` on the remote host.
    ///
    /// # Errors
    /// Returns a cleanup error if the file could not be removed.
    async fn remove(&self, remote_path: &str) -> Result<()>;

    /// Releases the connection. Calling it twice is a no-op.
    ///
    /// # Errors
    /// Returns a connection error if the connection could not be shut down
    /// cleanly.
    async fn close(&self) -> Result<()>;
}
