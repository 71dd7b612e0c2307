//! Stage orchestration.
//!
//! ```text
//! Idle -> Detecting -> Dumping -> Transferring -> CleaningUp -> Importing -> FixingUp -> Done
//!             |           |            |
//!             +-----------+------------+--> Aborted
//! ```
//!
//! Detection, dump and transfer failures abort the run. Cleanup, import and
//! fixup failures are logged, collected in the report, and the run carries
//! on. Stages are strictly sequential and nothing is retried. The remote
//! session is closed before [`Pipeline::run`] returns, whatever the outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::detection::CredentialDiscovery;
use crate::dump::DumpGenerator;
use crate::error::DbPullError;
use crate::import::{LocalDatabase, fixup_statements};
use crate::models::{DumpArtifact, ImportTarget};
use crate::session::RemoteSession;
use crate::transfer::Transfer;

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineStage {
    Idle,
    Detecting,
    Dumping,
    Transferring,
    CleaningUp,
    Importing,
    FixingUp,
    Done,
    Aborted,
}

impl PipelineStage {
    /// Whether the machine stops in this state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Detecting => "Detecting",
            Self::Dumping => "Dumping",
            Self::Transferring => "Transferring",
            Self::CleaningUp => "CleaningUp",
            Self::Importing => "Importing",
            Self::FixingUp => "FixingUp",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a run that reached [`PipelineStage::Done`].
#[derive(Debug)]
pub struct PipelineReport {
    /// Framework the credentials were read from
    pub framework: &'static str,
    /// Every state entered, starting at `Idle`
    pub stages: Vec<PipelineStage>,
    /// Tail-stage failures that were logged and skipped
    pub recovered: Vec<DbPullError>,
    pub artifact: DumpArtifact,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// The state the run ended in.
    pub fn final_stage(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Idle)
    }

    /// Whether every tail stage succeeded too.
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty()
    }
}

/// A run that ended in [`PipelineStage::Aborted`].
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    /// Stage that failed
    pub stage: PipelineStage,
    #[source]
    pub error: DbPullError,
    /// Every state entered, ending with `Aborted`
    pub stages: Vec<PipelineStage>,
}

/// What a run would do against the detected application, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub framework: &'static str,
    pub database: String,
    pub excluded_tables: Vec<String>,
    /// Remote command lines with the password redacted, in execution order
    pub remote_commands: Vec<String>,
    pub remote_artifact: String,
    pub local_artifact: PathBuf,
    pub container: String,
    pub fixup_statements: Vec<String>,
}

/// Records state transitions.
struct StageTrace {
    stages: Vec<PipelineStage>,
}

impl StageTrace {
    fn new() -> Self {
        Self {
            stages: vec![PipelineStage::Idle],
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        info!("Stage: {}", stage);
        self.stages.push(stage);
    }

    fn current(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Idle)
    }

    fn abort(mut self, error: DbPullError) -> PipelineFailure {
        let stage = self.current();
        error!("{} failed: {}", stage, error);
        self.stages.push(PipelineStage::Aborted);
        PipelineFailure {
            stage,
            error,
            stages: self.stages,
        }
    }
}

/// Sequences one snapshot-and-import run.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    discovery: &'a CredentialDiscovery,
    dump: DumpGenerator,
    target: ImportTarget,
}

impl<'a> Pipeline<'a> {
    /// Creates a pipeline over an immutable configuration.
    pub fn new(config: &'a PipelineConfig, discovery: &'a CredentialDiscovery) -> Self {
        Self {
            config,
            discovery,
            dump: DumpGenerator::for_config(config),
            target: config.import_target(),
        }
    }

    /// Runs every stage and closes `session`.
    ///
    /// # Errors
    /// Returns a [`PipelineFailure`] if detection, dump or transfer fails.
    pub async fn run(
        &self,
        session: &dyn RemoteSession,
        local: &dyn LocalDatabase,
    ) -> std::result::Result<PipelineReport, PipelineFailure> {
        let outcome = self.execute(session, local).await;
        close_session(session).await;
        outcome
    }

    async fn execute(
        &self,
        session: &dyn RemoteSession,
        local: &dyn LocalDatabase,
    ) -> std::result::Result<PipelineReport, PipelineFailure> {
        let started_at = Utc::now();
        let mut trace = StageTrace::new();
        let mut recovered = Vec::new();

        trace.enter(PipelineStage::Detecting);
        let discovery = match self
            .discovery
            .discover(session, self.config.remote_dir(), &self.config.excluded_tables)
            .await
        {
            Ok(discovery) => discovery,
            Err(e) => return Err(trace.abort(e)),
        };

        trace.enter(PipelineStage::Dumping);
        let artifact = match self.dump.generate(session, &discovery.credentials).await {
            Ok(artifact) => artifact,
            Err(e) => return Err(trace.abort(e)),
        };

        trace.enter(PipelineStage::Transferring);
        if let Err(e) = Transfer::fetch(session, &artifact).await {
            return Err(trace.abort(e));
        }

        trace.enter(PipelineStage::CleaningUp);
        if let Err(e) = Transfer::remove_remote(session, &artifact).await {
            recover(&mut recovered, e);
        }

        trace.enter(PipelineStage::Importing);
        let ready = if self.config.check_container {
            local.ensure_running(&self.target).await
        } else {
            Ok(())
        };
        match ready {
            Ok(()) => {
                if let Err(e) = local.import(&artifact.local_path, &self.target).await {
                    recover(&mut recovered, e);
                }
            }
            Err(e) => recover(&mut recovered, e),
        }

        trace.enter(PipelineStage::FixingUp);
        if let Err(e) = local.fixup(&self.target).await {
            recover(&mut recovered, e);
        }

        trace.enter(PipelineStage::Done);
        Ok(PipelineReport {
            framework: discovery.framework,
            stages: trace.stages,
            recovered,
            artifact,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Runs detection only and describes the rest of the run. Nothing on
    /// either host is modified. Closes `session`.
    ///
    /// # Errors
    /// Returns the detection or connection error.
    pub async fn plan(
        &self,
        session: &dyn RemoteSession,
    ) -> crate::error::Result<PipelinePlan> {
        let outcome = self
            .discovery
            .discover(session, self.config.remote_dir(), &self.config.excluded_tables)
            .await;
        close_session(session).await;
        let discovery = outcome?;
        let creds = &discovery.credentials;

        let listing = CredentialDiscovery::listing_command(self.config.remote_dir());
        let remote_commands = vec![
            listing.redacted(),
            self.dump.schema_command(creds).redacted(),
            self.dump.data_command(creds).redacted(),
        ];
        let artifact = self.dump.artifact();

        Ok(PipelinePlan {
            framework: discovery.framework,
            database: creds.database.clone(),
            excluded_tables: creds.excluded_tables.clone(),
            remote_commands,
            remote_artifact: artifact.remote_path.clone(),
            local_artifact: artifact.local_path.clone(),
            container: self.target.container.clone(),
            fixup_statements: fixup_statements(&self.target.server_name),
        })
    }
}

fn recover(recovered: &mut Vec<DbPullError>, error: DbPullError) {
    warn!("{} (continuing)", error);
    recovered.push(error);
}

async fn close_session(session: &dyn RemoteSession) {
    if let Err(e) = session.close().await {
        warn!("Failed to close remote session: {}", e);
    }
}
