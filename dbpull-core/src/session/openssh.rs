//! [`RemoteSession`] backed by the system OpenSSH client.
//!
//! `connect` starts a control master in the background; every later `ssh`
//! and `sftp` invocation is multiplexed over its socket, so commands,
//! downloads and deletes share one authenticated connection. The socket lives
//! in a private temporary directory that disappears with the session.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandOutput, RemoteSession};
use crate::config::RemoteConfig;
use crate::error::{DbPullError, Result};
use crate::shell::RemoteCommand;

/// Exit status OpenSSH reserves for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Multiplexed OpenSSH connection to the production host.
pub struct OpenSshSession {
    ssh: OsString,
    sftp: OsString,
    destination: String,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    control_path: PathBuf,
    closed: AtomicBool,
    // Dropped after `Drop::drop` has shut the master down.
    _control_dir: TempDir,
}

impl std::fmt::Debug for OpenSshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSshSession")
            .field("destination", &self.destination)
            .field("port", &self.port)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl OpenSshSession {
    /// Authenticates and starts the control master.
    ///
    /// Interactive prompts (passphrase, host key confirmation) go to the
    /// operator's terminal before the master detaches.
    ///
    /// # Errors
    /// Returns a connection error if `ssh` cannot be spawned or the master
    /// does not come up.
    pub async fn connect(remote: &RemoteConfig) -> Result<Self> {
        Self::connect_with(remote, "ssh", "sftp").await
    }

    /// Like [`connect`](Self::connect), with explicit `ssh` and `sftp`
    /// client programs.
    ///
    /// # Errors
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with(
        remote: &RemoteConfig,
        ssh: impl Into<OsString>,
        sftp: impl Into<OsString>,
    ) -> Result<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("dbpull-ssh-")
            .tempdir()
            .map_err(|e| DbPullError::io("Failed to create SSH control directory", e))?;

        let session = Self {
            ssh: ssh.into(),
            sftp: sftp.into(),
            destination: remote.destination(),
            port: remote.port,
            identity_file: remote.identity_file.clone(),
            control_path: control_dir.path().join("control.sock"),
            closed: AtomicBool::new(false),
            _control_dir: control_dir,
        };

        debug!("Starting SSH control master for {}", session.destination);

        let mut cmd = Command::new(&session.ssh);
        session.apply_common_args(&mut cmd, false);
        cmd.arg("-M")
            .arg("-N")
            .arg("-f")
            .arg("-o")
            .arg("ControlPersist=no")
            .arg(&session.destination)
            // The detached master inherits our pipes; capturing them would
            // block until the connection ends.
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let status = cmd.status().await.map_err(|e| {
            session.closed.store(true, Ordering::SeqCst);
            DbPullError::connection(format!("Failed to execute ssh: {e}"))
        })?;

        if !status.success() {
            session.closed.store(true, Ordering::SeqCst);
            return Err(DbPullError::connection(format!(
                "ssh to {} exited with {status}",
                session.destination
            )));
        }

        Ok(session)
    }

    /// Remote destination in `user@host` form.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Adds control socket, port and identity options. `sftp` spells the
    /// port flag `-P`.
    fn apply_common_args(&self, cmd: &mut Command, sftp_style: bool) {
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()));
        if let Some(port) = self.port {
            cmd.arg(if sftp_style { "-P" } else { "-p" })
                .arg(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
    }

    /// Runs one `sftp` batch over the control connection.
    async fn sftp_batch(&self, batch: String) -> std::result::Result<(), String> {
        let mut cmd = Command::new(&self.sftp);
        self.apply_common_args(&mut cmd, true);
        cmd.arg("-q")
            .arg("-b")
            .arg("-")
            .arg(&self.destination)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to execute sftp: {e}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(batch.as_bytes())
                .await
                .map_err(|e| format!("Failed to write sftp batch: {e}"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("Failed to wait for sftp: {e}"))?;

        let output = CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code(),
        };
        if output.success() {
            Ok(())
        } else {
            Err(output.summary())
        }
    }

    fn exit_master_blocking(&self) {
        let mut cmd = std::process::Command::new(&self.ssh);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Err(e) = cmd.status() {
            warn!("Failed to stop SSH control master: {}", e);
        }
    }
}

/// Quotes a path for an sftp batch line.
fn sftp_quote(path: &str) -> String {
    format!("\"{}\"", path.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        debug!("ssh {}: {}", self.destination, command.redacted());

        let mut cmd = Command::new(&self.ssh);
        self.apply_common_args(&mut cmd, false);
        cmd.arg(&self.destination)
            .arg("--")
            .arg(command.render())
            .stdin(Stdio::null());

        let output = cmd
            .output()
            .await
            .map_err(|e| DbPullError::connection(format!("Failed to execute ssh: {e}")))?;

        let output = CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code(),
        };

        if output.status == Some(SSH_ERROR_STATUS) {
            return Err(DbPullError::connection(format!(
                "ssh to {} failed: {}",
                self.destination,
                output.summary()
            )));
        }

        Ok(output)
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let local = local_path.to_string_lossy();
        debug!("sftp get {} -> {}", remote_path, local);

        self.sftp_batch(format!(
            "get {} {}\n",
            sftp_quote(remote_path),
            sftp_quote(&local)
        ))
        .await
        .map_err(|context| DbPullError::transfer(remote_path, context))
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        debug!("sftp rm {}", remote_path);

        self.sftp_batch(format!("rm {}\n", sftp_quote(remote_path)))
            .await
            .map_err(|context| DbPullError::cleanup(remote_path, context))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Stopping SSH control master for {}", self.destination);

        let output = Command::new(&self.ssh)
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DbPullError::connection(format!("Failed to execute ssh: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DbPullError::connection(format!(
                "Failed to stop SSH control master: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.exit_master_blocking();
        }
    }
}
