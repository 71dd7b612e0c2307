//! Framework detection and credential discovery.
//!
//! The remote application root is listed once; the first detector in
//! priority order that recognises the listing scrapes the database access
//! out of its framework's configuration file. Supporting another framework
//! means adding a detector, not touching the dispatch.
//!
//! # Module Structure
//! - `bitrix`: Bitrix CMS (`bitrix/.settings.php`)

mod bitrix;

pub use bitrix::BitrixDetector;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{DbPullError, Result};
use crate::models::DatabaseCredentials;
use crate::session::RemoteSession;
use crate::shell::RemoteCommand;

/// A framework that can be recognised from a directory listing and knows
/// where its database configuration lives.
#[async_trait]
pub trait FrameworkDetector: Send + Sync {
    /// Human-readable framework name
    fn name(&self) -> &'static str;

    /// Whether the listing of the application root belongs to this framework
    fn detect(&self, listing: &str) -> bool;

    /// One composite command, run from `dir`, that prints host, database,
    /// login and password on four lines in that order
    fn extraction_command(&self, dir: &str) -> RemoteCommand;

    /// Runs the extraction command and parses its output.
    ///
    /// # Errors
    /// Returns a detection error if the command fails or does not print
    /// exactly four non-empty lines.
    async fn extract_credentials(
        &self,
        session: &dyn RemoteSession,
        dir: &str,
        excluded_tables: &[String],
    ) -> Result<DatabaseCredentials> {
        let output = session.run(&self.extraction_command(dir)).await?;
        if !output.success() {
            return Err(DbPullError::detection(format!(
                "{} configuration could not be read: {}",
                self.name(),
                output.summary()
            )));
        }
        parse_credentials(&output.stdout_text(), excluded_tables.to_vec())
    }
}

/// Maps extraction output positionally onto [`DatabaseCredentials`].
///
/// Surrounding whitespace is ignored and each line is trimmed, so CRLF
/// configuration files parse the same as LF ones.
///
/// # Errors
/// Returns a detection error unless there are exactly four non-empty lines.
pub fn parse_credentials(output: &str, excluded_tables: Vec<String>) -> Result<DatabaseCredentials> {
    let trimmed = output.trim();
    let lines: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('\n').map(str::trim).collect()
    };
    DatabaseCredentials::from_lines(&lines, excluded_tables)
}

/// Result of a successful discovery.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub framework: &'static str,
    pub credentials: DatabaseCredentials,
}

/// Priority-ordered set of framework detectors.
pub struct CredentialDiscovery {
    detectors: Vec<Box<dyn FrameworkDetector>>,
}

impl Default for CredentialDiscovery {
    fn default() -> Self {
        Self::new(vec![Box::new(BitrixDetector)])
    }
}

impl CredentialDiscovery {
    /// Creates a discovery engine; earlier detectors win.
    pub fn new(detectors: Vec<Box<dyn FrameworkDetector>>) -> Self {
        Self { detectors }
    }

    /// Appends a detector with the lowest priority.
    #[must_use]
    pub fn with_detector(mut self, detector: Box<dyn FrameworkDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Names of the registered frameworks in priority order.
    pub fn framework_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// `cd <dir> && ls`
    pub fn listing_command(dir: &str) -> RemoteCommand {
        RemoteCommand::new().cd(dir).raw("ls")
    }

    /// Picks the first detector that recognises the listing.
    ///
    /// # Errors
    /// Returns a detection error if no detector matches.
    pub fn select(&self, listing: &str) -> Result<&dyn FrameworkDetector> {
        self.detectors
            .iter()
            .find(|d| d.detect(listing))
            .map(|d| d.as_ref())
            .ok_or_else(|| {
                DbPullError::detection(
                    "Failed to determine the framework; database access must be specified manually",
                )
            })
    }

    /// Lists `dir`, selects a framework and extracts its credentials.
    ///
    /// Nothing on the remote host is modified.
    ///
    /// # Errors
    /// Returns a connection error if the session fails, or a detection error
    /// if the listing fails, no framework matches or extraction is incomplete.
    pub async fn discover(
        &self,
        session: &dyn RemoteSession,
        dir: &str,
        excluded_tables: &[String],
    ) -> Result<Discovery> {
        let listing = session.run(&Self::listing_command(dir)).await?;
        if !listing.success() {
            return Err(DbPullError::detection(format!(
                "Failed to list {dir}: {}",
                listing.summary()
            )));
        }

        let detector = self.select(&listing.stdout_text())?;
        info!("{} detected", detector.name());

        let credentials = detector
            .extract_credentials(session, dir, excluded_tables)
            .await?;
        debug!(
            "Database access found: {}@{}/{}",
            credentials.login, credentials.host, credentials.database
        );

        Ok(Discovery {
            framework: detector.name(),
            credentials,
        })
    }
}
