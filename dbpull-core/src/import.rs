//! Local import into the application's database container.
//!
//! The artifact is decompressed on the fly and fed to the MySQL client
//! running inside `<app>_db`; afterwards a fixed set of statements adapts the
//! snapshot to the local environment. Import and fixup are independent
//! best-effort steps: a failed import does not stop the fixup, and a failed
//! fixup does not undo the import.

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use std::ffi::OsString;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DbPullError, Result};
use crate::models::{ImportTarget, LocalLogin};

/// MySQL client binary inside the database container.
const MYSQL_CLIENT: &str = "/usr/bin/mysql";

/// Escapes a value for a single-quoted SQL string literal.
pub fn sql_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Statements that make a production snapshot usable locally: enable the
/// development-server flag and point the default site at `server_name`.
///
/// # Example
/// ```rust
/// use dbpull_core::import::fixup_statements;
///
/// let sql = fixup_statements("myapp");
/// assert_eq!(sql[1], "UPDATE b_lang SET SERVER_NAME='myapp' WHERE LID='s1';");
/// ```
pub fn fixup_statements(server_name: &str) -> Vec<String> {
    vec![
        "UPDATE b_option SET VALUE = 'Y' WHERE MODULE_ID = 'main' AND NAME = 'update_devsrv';"
            .to_string(),
        format!(
            "UPDATE b_lang SET SERVER_NAME='{}' WHERE LID='s1';",
            sql_escape(server_name)
        ),
    ]
}

/// Decompresses a (possibly multi-member) gzip stream into `sink`.
///
/// Returns the number of uncompressed bytes written.
///
/// # Errors
/// Returns the underlying I/O error for corrupt input or a closed sink.
pub fn stream_artifact<R: Read, W: Write>(source: R, sink: &mut W) -> std::io::Result<u64> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(source));
    let written = std::io::copy(&mut decoder, sink)?;
    sink.flush()?;
    Ok(written)
}

/// The local database engine the artifact is imported into.
#[async_trait]
pub trait LocalDatabase: Send + Sync {
    /// Checks that the target is ready to accept the import.
    ///
    /// # Errors
    /// Returns an import error if the target is not running.
    async fn ensure_running(&self, target: &ImportTarget) -> Result<()>;

    /// Streams the decompressed artifact into the target database.
    ///
    /// # Errors
    /// Returns an import error if the artifact cannot be read or the client
    /// fails.
    async fn import(&self, artifact: &Path, target: &ImportTarget) -> Result<()>;

    /// Runs [`fixup_statements`] against the target database.
    ///
    /// # Errors
    /// Returns a fixup error if the client fails.
    async fn fixup(&self, target: &ImportTarget) -> Result<()>;
}

/// Database container driven through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct ContainerDatabase {
    program: OsString,
}

impl Default for ContainerDatabase {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ContainerDatabase {
    /// Uses `program` as the container CLI.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `exec -i <container> /usr/bin/mysql <login args>`
    pub fn client_args(container: &str, login: &LocalLogin) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-i".to_string(),
            container.to_string(),
            MYSQL_CLIENT.to_string(),
        ];
        args.extend(login.client_args());
        args
    }
}

/// Runs the client with the decompressed artifact on stdin. Blocking.
fn import_blocking(
    program: &OsString,
    args: &[String],
    artifact: &Path,
) -> std::result::Result<u64, String> {
    let file = std::fs::File::open(artifact)
        .map_err(|e| format!("cannot open {}: {e}", artifact.display()))?;

    let mut child = std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| format!("failed to execute {}: {e}", program.to_string_lossy()))?;

    // stdin must be dropped before waiting so the client sees EOF.
    let streamed = match child.stdin.take() {
        Some(mut stdin) => stream_artifact(file, &mut stdin),
        None => Err(std::io::Error::other("client stdin unavailable")),
    };

    let status = child
        .wait()
        .map_err(|e| format!("failed to wait for client: {e}"))?;
    if !status.success() {
        return Err(format!("client exited with {status}"));
    }

    streamed.map_err(|e| format!("cannot stream {}: {e}", artifact.display()))
}

#[async_trait]
impl LocalDatabase for ContainerDatabase {
    async fn ensure_running(&self, target: &ImportTarget) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("inspect")
            .arg("-f")
            .arg("{{.State.Running}}")
            .arg(&target.container)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DbPullError::import(
                    &target.container,
                    format!("failed to execute {}: {e}", self.program.to_string_lossy()),
                )
            })?;

        let state = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && state.trim() == "true" {
            Ok(())
        } else {
            Err(DbPullError::import(
                &target.container,
                "container is not running; start the local environment first",
            ))
        }
    }

    async fn import(&self, artifact: &Path, target: &ImportTarget) -> Result<()> {
        info!("Importing {} into {}", artifact.display(), target.container);

        let program = self.program.clone();
        let args = Self::client_args(&target.container, &target.import_login);
        let path: PathBuf = artifact.to_path_buf();

        let bytes = tokio::task::spawn_blocking(move || import_blocking(&program, &args, &path))
            .await
            .map_err(|e| DbPullError::import(&target.container, format!("import task failed: {e}")))?
            .map_err(|context| DbPullError::import(&target.container, context))?;

        debug!("Imported {} uncompressed bytes", bytes);
        Ok(())
    }

    async fn fixup(&self, target: &ImportTarget) -> Result<()> {
        info!("Updating site options in {}", target.container);

        let mut child = Command::new(&self.program)
            .args(Self::client_args(&target.container, &target.fixup_login))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DbPullError::fixup(
                    &target.container,
                    format!("failed to execute {}: {e}", self.program.to_string_lossy()),
                )
            })?;

        let sql = format!("{}\n", fixup_statements(&target.server_name).join(" "));
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(sql.as_bytes()).await.map_err(|e| {
                DbPullError::fixup(&target.container, format!("cannot write statements: {e}"))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            DbPullError::fixup(&target.container, format!("failed to wait for client: {e}"))
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(DbPullError::fixup(
                &target.container,
                if stderr.is_empty() {
                    format!("client exited with {}", output.status)
                } else {
                    stderr
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_fixup_statements() {
        assert_eq!(
            fixup_statements("myapp"),
            vec![
                "UPDATE b_option SET VALUE = 'Y' WHERE MODULE_ID = 'main' AND NAME = 'update_devsrv';",
                "UPDATE b_lang SET SERVER_NAME='myapp' WHERE LID='s1';",
            ]
        );
    }

    #[test]
    fn test_fixup_statements_escape_server_name() {
        let sql = fixup_statements(r"o'neil\site");
        assert_eq!(
            sql[1],
            r"UPDATE b_lang SET SERVER_NAME='o\'neil\\site' WHERE LID='s1';"
        );
    }

    #[test]
    fn test_stream_artifact_reads_every_member() {
        let mut artifact = gzip(b"CREATE TABLE b_user (ID int);\n");
        artifact.extend(gzip(b"INSERT INTO b_user VALUES (1);\n"));

        let mut sink = Vec::new();
        let written = stream_artifact(artifact.as_slice(), &mut sink).unwrap();

        assert_eq!(
            sink,
            b"CREATE TABLE b_user (ID int);\nINSERT INTO b_user VALUES (1);\n"
        );
        assert_eq!(written, sink.len() as u64);
    }

    #[test]
    fn test_stream_artifact_rejects_garbage() {
        let mut sink = Vec::new();
        assert!(stream_artifact(&b"not gzip at all"[..], &mut sink).is_err());
    }

    #[test]
    fn test_client_args() {
        let target = ImportTarget::for_application("myapp");
        assert_eq!(
            ContainerDatabase::client_args(&target.container, &target.import_login),
            vec![
                "exec",
                "-i",
                "myapp_db",
                "/usr/bin/mysql",
                "--user=root",
                "--password=root",
                "db"
            ]
        );
        assert_eq!(
            ContainerDatabase::client_args(&target.container, &target.fixup_login),
            vec![
                "exec",
                "-i",
                "myapp_db",
                "/usr/bin/mysql",
                "--user=db",
                "--password=db",
                "--host=db",
                "db"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_cli_is_recoverable() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifact = dir.path().join("production.sql.gz");
        std::fs::write(&artifact, gzip(b"SELECT 1;\n")).unwrap();

        let database = ContainerDatabase::new("dbpull-no-such-docker");
        let target = ImportTarget::for_application("myapp");

        let error = database.ensure_running(&target).await.unwrap_err();
        assert!(matches!(error, DbPullError::Import { .. }));

        let error = database.import(&artifact, &target).await.unwrap_err();
        assert!(matches!(error, DbPullError::Import { .. }));
        assert!(!error.is_fatal());

        let error = database.fixup(&target).await.unwrap_err();
        assert!(matches!(error, DbPullError::Fixup { .. }));
        assert!(!error.is_fatal());
    }

    #[tokio::test]
    async fn test_import_missing_artifact() {
        let database = ContainerDatabase::default();
        let target = ImportTarget::for_application("myapp");
        let error = database
            .import(Path::new("/nonexistent/production.sql.gz"), &target)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("cannot open"));
    }
}
