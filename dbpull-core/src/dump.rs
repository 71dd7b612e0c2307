//! Two-phase remote dump.
//!
//! The schema is dumped first into a fresh gzip file, then the row data is
//! appended as a second gzip member. Each phase is its own remote call so a
//! failed schema dump never leads to a data dump.
//!
//! Both phases run under `set -o pipefail`; without it the exit status of
//! `mysqldump | gzip` would be that of `gzip` and a failed dump would pass.

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{DbPullError, Result};
use crate::models::{DatabaseCredentials, DumpArtifact};
use crate::session::RemoteSession;
use crate::shell::RemoteCommand;

/// Dump phase, used in logs and [`DbPullError::Dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPhase {
    Schema,
    Data,
}

impl DumpPhase {
    /// Lowercase phase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Data => "data",
        }
    }
}

impl std::fmt::Display for DumpPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds and runs the dump commands for one remote application root.
#[derive(Debug, Clone)]
pub struct DumpGenerator {
    remote_dir: String,
    artifact: DumpArtifact,
}

impl DumpGenerator {
    /// Creates a generator that writes `<remote_dir>/production.sql.gz`.
    pub fn new(remote_dir: impl Into<String>, artifact: DumpArtifact) -> Self {
        Self {
            remote_dir: remote_dir.into(),
            artifact,
        }
    }

    /// Generator for the remote catalog and artifact of `config`.
    pub fn for_config(config: &PipelineConfig) -> Self {
        Self::new(config.remote_dir(), config.artifact())
    }

    /// The artifact this generator produces.
    pub const fn artifact(&self) -> &DumpArtifact {
        &self.artifact
    }

    /// `--ignore-table=<db>.<table>` for each excluded table, in order.
    pub fn ignore_table_args(creds: &DatabaseCredentials) -> Vec<String> {
        creds
            .excluded_tables
            .iter()
            .map(|table| format!("--ignore-table={}.{table}", creds.database))
            .collect()
    }

    /// The ignore flags joined by single spaces; empty when nothing is
    /// excluded.
    ///
    /// # Example
    /// ```rust
    /// use dbpull_core::dump::DumpGenerator;
    /// use dbpull_core::models::DatabaseCredentials;
    ///
    /// let creds = DatabaseCredentials::from_lines(
    ///     &["db", "shop", "user", "pw"],
    ///     vec!["sessions".to_string(), "logs".to_string()],
    /// )?;
    /// assert_eq!(
    ///     DumpGenerator::format_ignored_tables(&creds),
    ///     "--ignore-table=shop.sessions --ignore-table=shop.logs"
    /// );
    /// # Ok::<(), dbpull_core::DbPullError>(())
    /// ```
    pub fn format_ignored_tables(creds: &DatabaseCredentials) -> String {
        Self::ignore_table_args(creds).join(" ")
    }

    fn mysqldump(creds: &DatabaseCredentials) -> RemoteCommand {
        RemoteCommand::new()
            .raw("mysqldump")
            .arg(format!("--host={}", creds.host))
            .arg(format!("--user={}", creds.login))
            .secret("--password=", creds.password())
    }

    fn prologue(&self) -> RemoteCommand {
        RemoteCommand::new()
            .raw("set")
            .raw("-o")
            .raw("pipefail")
            .and(RemoteCommand::new().cd(&self.remote_dir))
    }

    /// Structure only, truncating the artifact.
    pub fn schema_command(&self, creds: &DatabaseCredentials) -> RemoteCommand {
        let dump = Self::mysqldump(creds)
            .raw("--single-transaction=1")
            .raw("--lock-tables=false")
            .raw("--no-data")
            .raw("--no-tablespaces")
            .arg(creds.database.as_str());

        self.prologue().and(
            dump.pipe(
                RemoteCommand::new()
                    .raw("gzip")
                    .raw(">")
                    .arg(self.artifact.remote_path.as_str()),
            ),
        )
    }

    /// Rows only, minus excluded tables, appended to the artifact as a
    /// second gzip member.
    pub fn data_command(&self, creds: &DatabaseCredentials) -> RemoteCommand {
        let dump = Self::ignore_table_args(creds).into_iter().fold(
            Self::mysqldump(creds)
                .raw("--single-transaction=1")
                .raw("--force")
                .raw("--lock-tables=false")
                .raw("--no-tablespaces")
                .raw("--no-create-info"),
            |cmd, flag| cmd.arg(flag),
        );

        self.prologue().and(
            dump.arg(creds.database.as_str()).pipe(
                RemoteCommand::new()
                    .raw("gzip")
                    .raw(">>")
                    .arg(self.artifact.remote_path.as_str()),
            ),
        )
    }

    /// Runs the schema phase and, only if it succeeds, the data phase.
    ///
    /// A partial artifact left behind by a failed phase is not removed.
    ///
    /// # Errors
    /// Returns a dump error naming the phase and carrying the remote stderr,
    /// or a connection error if the session fails.
    pub async fn generate(
        &self,
        session: &dyn RemoteSession,
        creds: &DatabaseCredentials,
    ) -> Result<DumpArtifact> {
        info!("Creating database dump of {}", creds.database);

        Self::run_phase(session, DumpPhase::Schema, &self.schema_command(creds)).await?;
        Self::run_phase(session, DumpPhase::Data, &self.data_command(creds)).await?;

        Ok(self.artifact.clone())
    }

    async fn run_phase(
        session: &dyn RemoteSession,
        phase: DumpPhase,
        command: &RemoteCommand,
    ) -> Result<()> {
        debug!("Dump {} phase: {}", phase, command);
        let output = session.run(command).await?;
        if output.success() {
            Ok(())
        } else {
            Err(DbPullError::dump(phase.as_str(), output.summary()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;

    fn creds(excluded: &[&str]) -> DatabaseCredentials {
        DatabaseCredentials::from_lines(
            &["db", "shop_db", "root", "secret"],
            excluded.iter().map(ToString::to_string).collect(),
        )
        .unwrap()
    }

    fn generator() -> DumpGenerator {
        DumpGenerator::new(
            "/var/www/site",
            DumpArtifact::new("/var/www/site", Path::new("/home/dev/myapp")),
        )
    }

    #[test]
    fn test_format_ignored_tables() {
        assert_eq!(DumpGenerator::format_ignored_tables(&creds(&[])), "");
        assert_eq!(
            DumpGenerator::format_ignored_tables(&creds(&["sessions"])),
            "--ignore-table=shop_db.sessions"
        );
        assert_eq!(
            DumpGenerator::ignore_table_args(&creds(&["sessions", "logs"])),
            vec![
                "--ignore-table=shop_db.sessions",
                "--ignore-table=shop_db.logs"
            ]
        );
    }

    #[test]
    fn test_schema_command() {
        assert_eq!(
            generator().schema_command(&creds(&["sessions"])).render(),
            "set -o pipefail && cd /var/www/site && mysqldump --host=db --user=root \
             --password=secret --single-transaction=1 --lock-tables=false --no-data \
             --no-tablespaces shop_db | gzip > /var/www/site/production.sql.gz"
        );
    }

    #[test]
    fn test_data_command() {
        assert_eq!(
            generator().data_command(&creds(&["sessions"])).render(),
            "set -o pipefail && cd /var/www/site && mysqldump --host=db --user=root \
             --password=secret --single-transaction=1 --force --lock-tables=false \
             --no-tablespaces --no-create-info --ignore-table=shop_db.sessions shop_db \
             | gzip >> /var/www/site/production.sql.gz"
        );
    }

    #[test]
    fn test_data_command_without_exclusions() {
        let rendered = generator().data_command(&creds(&[])).render();
        assert!(!rendered.contains("--ignore-table"));
        assert!(rendered.contains("--no-create-info shop_db | gzip >>"));
    }

    #[test]
    fn test_commands_redact_password() {
        let generator = generator();
        for cmd in [
            generator.schema_command(&creds(&[])),
            generator.data_command(&creds(&[])),
        ] {
            assert!(!cmd.redacted().contains("secret"));
            assert!(cmd.redacted().contains("--password=****"));
        }
    }

    #[test]
    fn test_hostile_values_are_quoted() {
        let creds = DatabaseCredentials::from_lines(
            &["db", "shop; rm -rf /", "root", "pa'ss"],
            vec![],
        )
        .unwrap();
        let rendered = generator().schema_command(&creds).render();
        assert!(rendered.contains("'shop; rm -rf /'"));
        assert!(rendered.contains(r"'--password=pa'\''ss'"));
    }

    proptest! {
        #[test]
        fn prop_one_scoped_flag_per_excluded_table(
            tables in proptest::collection::vec("[a-z_][a-z0-9_]{0,20}", 0..8)
        ) {
            let refs: Vec<&str> = tables.iter().map(String::as_str).collect();
            let creds = creds(&refs);
            let rendered = generator().data_command(&creds).render();

            prop_assert_eq!(rendered.matches("--ignore-table=").count(), tables.len());
            for table in &tables {
                let flag = format!("--ignore-table=shop_db.{} ", table);
                prop_assert!(rendered.contains(&flag), "missing {}", flag);
            }
            prop_assert!(!generator().schema_command(&creds).render().contains("--ignore-table"));
        }
    }
}
