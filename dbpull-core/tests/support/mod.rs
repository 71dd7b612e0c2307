//! Scripted test doubles for both ends of the pipeline.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use dbpull_core::import::stream_artifact;
use dbpull_core::{
    CommandOutput, DbPullError, ImportTarget, LocalDatabase, PipelineConfig, RemoteCommand,
    RemoteConfig, RemoteSession, Result,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const APP_NAME: &str = "myapp";
pub const REMOTE_DIR: &str = "/var/www/site";
pub const REMOTE_ARTIFACT: &str = "/var/www/site/production.sql.gz";
pub const SENSITIVE_PASSWORD: &str = "super_secret_password_123";

/// Extraction output for host `db`, database `shop_db`, login `root`.
pub fn credential_output(password: &str) -> String {
    format!("db\nshop_db\nroot\n{password}\n")
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Schema member followed by data member, as the remote dump produces.
pub fn two_member_artifact() -> Vec<u8> {
    let mut bytes = gzip(b"CREATE TABLE b_user (ID int);\n");
    bytes.extend(gzip(b"INSERT INTO b_user VALUES (1);\n"));
    bytes
}

pub fn config(project_dir: &Path, excluded: &[&str]) -> PipelineConfig {
    PipelineConfig::new(
        APP_NAME,
        project_dir,
        RemoteConfig::new("prod.example.com", REMOTE_DIR),
    )
    .with_excluded_tables(excluded.iter().map(ToString::to_string).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Run { rendered: String, redacted: String },
    Fetch { remote: String, local: PathBuf },
    Remove { remote: String },
    Close,
}

/// Answers commands by shape: listing, credential extraction, schema dump,
/// data dump.
pub struct FakeSession {
    pub listing: CommandOutput,
    pub extraction: CommandOutput,
    pub schema: CommandOutput,
    pub data: CommandOutput,
    /// Written to the local path on fetch; `None` makes fetch fail
    pub payload: Option<Vec<u8>>,
    pub remove_fails: bool,
    pub calls: Mutex<Vec<SessionCall>>,
}

impl FakeSession {
    /// A Bitrix host whose dump and transfer succeed.
    pub fn bitrix() -> Self {
        Self {
            listing: CommandOutput::ok("bitrix\nindex.php\nlocal\nupload\n"),
            extraction: CommandOutput::ok(credential_output(SENSITIVE_PASSWORD)),
            schema: CommandOutput::ok(""),
            data: CommandOutput::ok(""),
            payload: Some(two_member_artifact()),
            remove_fails: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rendered_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Run { rendered, .. } => Some(rendered),
                _ => None,
            })
            .collect()
    }

    pub fn redacted_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Run { redacted, .. } => Some(redacted),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == SessionCall::Close)
            .count()
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        let rendered = command.render();
        self.record(SessionCall::Run {
            rendered: rendered.clone(),
            redacted: command.redacted(),
        });

        let output = if rendered.ends_with("&& ls") {
            &self.listing
        } else if rendered.contains("bitrix/.settings.php") {
            &self.extraction
        } else if rendered.contains("--no-data") {
            &self.schema
        } else if rendered.contains("--no-create-info") {
            &self.data
        } else {
            return Ok(CommandOutput::ok(""));
        };
        Ok(output.clone())
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.record(SessionCall::Fetch {
            remote: remote_path.to_string(),
            local: local_path.to_path_buf(),
        });
        match &self.payload {
            Some(bytes) => {
                std::fs::write(local_path, bytes).map_err(|e| DbPullError::io("fake fetch", e))
            }
            None => Err(DbPullError::transfer(remote_path, "Permission denied")),
        }
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        self.record(SessionCall::Remove {
            remote: remote_path.to_string(),
        });
        if self.remove_fails {
            Err(DbPullError::cleanup(remote_path, "Permission denied"))
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<()> {
        self.record(SessionCall::Close);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseCall {
    EnsureRunning { container: String },
    Import { artifact: PathBuf, container: String, sql: String },
    Fixup { container: String, server_name: String },
}

/// Records what the pipeline asks of the local database and decodes the
/// artifact it is handed.
#[derive(Default)]
pub struct RecordingDatabase {
    pub stopped: bool,
    pub import_fails: bool,
    pub fixup_fails: bool,
    pub calls: Mutex<Vec<DatabaseCall>>,
}

impl RecordingDatabase {
    pub fn calls(&self) -> Vec<DatabaseCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: DatabaseCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl LocalDatabase for RecordingDatabase {
    async fn ensure_running(&self, target: &ImportTarget) -> Result<()> {
        self.record(DatabaseCall::EnsureRunning {
            container: target.container.clone(),
        });
        if self.stopped {
            Err(DbPullError::import(&target.container, "container is not running"))
        } else {
            Ok(())
        }
    }

    async fn import(&self, artifact: &Path, target: &ImportTarget) -> Result<()> {
        let file = std::fs::File::open(artifact).map_err(|e| DbPullError::io("open", e))?;
        let mut sql = Vec::new();
        stream_artifact(file, &mut sql).map_err(|e| DbPullError::io("decode", e))?;

        self.record(DatabaseCall::Import {
            artifact: artifact.to_path_buf(),
            container: target.container.clone(),
            sql: String::from_utf8_lossy(&sql).into_owned(),
        });
        if self.import_fails {
            Err(DbPullError::import(&target.container, "ERROR 1045 (28000)"))
        } else {
            Ok(())
        }
    }

    async fn fixup(&self, target: &ImportTarget) -> Result<()> {
        self.record(DatabaseCall::Fixup {
            container: target.container.clone(),
            server_name: target.server_name.clone(),
        });
        if self.fixup_fails {
            Err(DbPullError::fixup(&target.container, "ERROR 1146 (42S02)"))
        } else {
            Ok(())
        }
    }
}
