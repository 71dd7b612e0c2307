//! Data model of a single pipeline run.
//!
//! Nothing here outlives one invocation except the local artifact file,
//! which is kept after import.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{DbPullError, Result};

/// File name of the dump artifact on both hosts.
pub const ARTIFACT_FILE_NAME: &str = "production.sql.gz";

/// Database access scraped from a remote framework configuration file.
///
/// The password is held in a zeroizing container and never appears in
/// `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseCredentials {
    pub host: String,
    pub database: String,
    pub login: String,
    password: Zeroizing<String>,
    pub excluded_tables: Vec<String>,
}

impl DatabaseCredentials {
    /// Number of fields a framework extractor must produce.
    pub const FIELD_COUNT: usize = 4;

    /// Builds credentials from extracted lines in the fixed order host,
    /// database, login, password.
    ///
    /// # Errors
    /// Returns a detection error unless exactly four non-empty lines are given.
    ///
    /// # Example
    /// ```rust
    /// use dbpull_core::models::DatabaseCredentials;
    ///
    /// let creds = DatabaseCredentials::from_lines(
    ///     &["localhost", "shop", "shop_user", "secret"],
    ///     vec!["b_event_log".to_string()],
    /// )?;
    /// assert_eq!(creds.database, "shop");
    /// assert!(!format!("{creds:?}").contains("secret"));
    /// # Ok::<(), dbpull_core::DbPullError>(())
    /// ```
    pub fn from_lines(lines: &[&str], excluded_tables: Vec<String>) -> Result<Self> {
        let [host, database, login, password] = lines else {
            return Err(DbPullError::detection(format!(
                "expected {} credential fields, found {}",
                Self::FIELD_COUNT,
                lines.len()
            )));
        };

        for (name, value) in [
            ("host", host),
            ("database", database),
            ("login", login),
            ("password", password),
        ] {
            if value.is_empty() {
                return Err(DbPullError::detection(format!(
                    "credential field '{name}' is empty"
                )));
            }
        }

        Ok(Self {
            host: (*host).to_string(),
            database: (*database).to_string(),
            login: (*login).to_string(),
            password: Zeroizing::new((*password).to_string()),
            excluded_tables,
        })
    }

    /// The database password. Callers must only place it into secret
    /// command segments.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("login", &self.login)
            .field("password", &crate::shell::REDACTED)
            .field("excluded_tables", &self.excluded_tables)
            .finish()
    }
}

/// The compressed dump, tracked on both hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpArtifact {
    /// Multi-member gzip file on the remote host
    pub remote_path: String,
    /// Download destination on the local host
    pub local_path: PathBuf,
    pub compressed: bool,
}

impl DumpArtifact {
    /// Creates the artifact record for the standard file name.
    pub fn new(remote_dir: &str, local_dir: &std::path::Path) -> Self {
        Self {
            remote_path: format!(
                "{}/{ARTIFACT_FILE_NAME}",
                remote_dir.trim_end_matches('/')
            ),
            local_path: local_dir.join(ARTIFACT_FILE_NAME),
            compressed: true,
        }
    }
}

/// Login used against the local database container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalLogin {
    pub user: String,
    pub password: String,
    /// `--host` passed to the client, if any
    pub host: Option<String>,
    pub database: String,
}

impl LocalLogin {
    /// Client arguments in the order `--user --password [--host] database`.
    pub fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--user={}", self.user),
            format!("--password={}", self.password),
        ];
        if let Some(host) = &self.host {
            args.push(format!("--host={host}"));
        }
        args.push(self.database.clone());
        args
    }
}

/// Destination database inside a running local container.
///
/// The import and fixup logins differ (`root/root` against the socket vs.
/// `db/db` against host `db`); both are kept as the container images seed
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportTarget {
    pub container: String,
    /// Written into the fixup statements as the site server name
    pub server_name: String,
    pub import_login: LocalLogin,
    pub fixup_login: LocalLogin,
}

impl ImportTarget {
    /// Derives the target for a local application name (`<app>_db`).
    pub fn for_application(app_name: &str) -> Self {
        Self {
            container: format!("{app_name}_db"),
            server_name: app_name.to_string(),
            import_login: LocalLogin {
                user: "root".to_string(),
                password: "root".to_string(),
                host: None,
                database: "db".to_string(),
            },
            fixup_login: LocalLogin {
                user: "db".to_string(),
                password: "db".to_string(),
                host: Some("db".to_string()),
                database: "db".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_credentials_positional_mapping() {
        let creds =
            DatabaseCredentials::from_lines(&["db", "shop_db", "root", "secret"], vec![]).unwrap();
        assert_eq!(creds.host, "db");
        assert_eq!(creds.database, "shop_db");
        assert_eq!(creds.login, "root");
        assert_eq!(creds.password(), "secret");
        assert!(creds.excluded_tables.is_empty());
    }

    #[test]
    fn test_credentials_wrong_count() {
        for lines in [
            vec![],
            vec!["db"],
            vec!["db", "shop", "root"],
            vec!["db", "shop", "root", "secret", "extra"],
        ] {
            let result = DatabaseCredentials::from_lines(&lines, vec![]);
            assert!(matches!(result, Err(DbPullError::Detection { .. })));
        }
    }

    #[test]
    fn test_credentials_empty_field() {
        let result = DatabaseCredentials::from_lines(&["db", "", "root", "secret"], vec![]);
        let error = result.unwrap_err();
        assert!(error.to_string().contains("database"));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds =
            DatabaseCredentials::from_lines(&["db", "shop", "root", "hunter2"], vec![]).unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_artifact_paths() {
        let artifact = DumpArtifact::new("/var/www/site/", Path::new("/home/dev/myapp"));
        assert_eq!(artifact.remote_path, "/var/www/site/production.sql.gz");
        assert_eq!(
            artifact.local_path,
            Path::new("/home/dev/myapp/production.sql.gz")
        );
        assert!(artifact.compressed);
    }

    #[test]
    fn test_import_target_for_application() {
        let target = ImportTarget::for_application("myapp");
        assert_eq!(target.container, "myapp_db");
        assert_eq!(target.server_name, "myapp");
        assert_eq!(
            target.import_login.client_args(),
            vec!["--user=root", "--password=root", "db"]
        );
        assert_eq!(
            target.fixup_login.client_args(),
            vec!["--user=db", "--password=db", "--host=db", "db"]
        );
    }
}
