//! Immutable pipeline configuration.
//!
//! The configuration is built once by the binary (from flags, the process
//! environment and the project `.env` file) and handed to every stage by
//! reference.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{DbPullError, Result};
use crate::models::{DumpArtifact, ImportTarget};

/// A single unqualified table name: no schema qualifier, no whitespace.
#[allow(clippy::expect_used)]
fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s.]+$").expect("Invalid table name pattern"))
}

/// How to reach the production host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteConfig {
    /// SSH host name or alias
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    /// Application root on the remote host
    pub catalog: String,
}

impl RemoteConfig {
    /// Creates a remote config with no port, user or key overrides.
    pub fn new(host: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            identity_file: None,
            catalog: catalog.into(),
        }
    }

    /// Builder method to set the SSH port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set the SSH user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder method to set the private key file.
    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// `user@host`, or just `host` when no user is configured.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Everything one pipeline run needs to know.
///
/// # Example
/// ```rust
/// use dbpull_core::config::{PipelineConfig, RemoteConfig};
///
/// let config = PipelineConfig::new(
///     "myapp",
///     "/home/dev/myapp",
///     RemoteConfig::new("prod.example.com", "/var/www/site"),
/// )
/// .with_excluded_tables(PipelineConfig::parse_excluded_tables("b_event_log, b_search_content"));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.import_target().container, "myapp_db");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    /// Local application name; the database container is `<app_name>_db`
    pub app_name: String,
    /// Tables whose rows are left out of the data dump
    pub excluded_tables: Vec<String>,
    /// Local project directory that receives the artifact
    pub project_dir: PathBuf,
    pub remote: RemoteConfig,
    /// Check that the target container is running before importing
    pub check_container: bool,
}

impl PipelineConfig {
    /// Creates a config with no excluded tables and the container check on.
    pub fn new(
        app_name: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        remote: RemoteConfig,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            excluded_tables: Vec::new(),
            project_dir: project_dir.into(),
            remote,
            check_container: true,
        }
    }

    /// Builder method to set excluded tables.
    #[must_use]
    pub fn with_excluded_tables(mut self, tables: Vec<String>) -> Self {
        self.excluded_tables = tables;
        self
    }

    /// Builder method to toggle the container liveness check.
    #[must_use]
    pub const fn with_container_check(mut self, enabled: bool) -> Self {
        self.check_container = enabled;
        self
    }

    /// Splits a comma-separated table list, trimming entries and dropping
    /// empty ones.
    pub fn parse_excluded_tables(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Validates configuration values.
    ///
    /// # Errors
    /// Returns a configuration error for empty names, port 0 or table names
    /// that contain whitespace or a `.` qualifier.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(DbPullError::configuration(
                "APP_NAME is not defined; initialize the project .env file",
            ));
        }

        if self.remote.host.trim().is_empty() {
            return Err(DbPullError::configuration("remote host cannot be empty"));
        }

        if self.remote.catalog.trim().is_empty() {
            return Err(DbPullError::configuration(
                "remote catalog cannot be empty",
            ));
        }

        if self.remote.port == Some(0) {
            return Err(DbPullError::configuration("port must be greater than 0"));
        }

        if let Some(table) = self
            .excluded_tables
            .iter()
            .find(|t| !table_name_pattern().is_match(t))
        {
            return Err(DbPullError::configuration(format!(
                "excluded table '{table}' is not a plain table name"
            )));
        }

        Ok(())
    }

    /// The remote application root.
    pub fn remote_dir(&self) -> &str {
        &self.remote.catalog
    }

    /// `<project_dir>/production.sql.gz`
    pub fn local_artifact_path(&self) -> PathBuf {
        self.artifact().local_path
    }

    /// `<catalog>/production.sql.gz`
    pub fn remote_artifact_path(&self) -> String {
        self.artifact().remote_path
    }

    /// The artifact record for this run.
    pub fn artifact(&self) -> DumpArtifact {
        DumpArtifact::new(&self.remote.catalog, &self.project_dir)
    }

    /// The local database this run imports into.
    pub fn import_target(&self) -> ImportTarget {
        ImportTarget::for_application(&self.app_name)
    }

    /// The local project directory.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}
