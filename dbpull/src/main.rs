//! Production database pull tool.
//!
//! This binary detects the application on the production host, dumps its
//! database over SSH, downloads the dump and imports it into the local
//! `<APP_NAME>_db` container.
//!
//! # Security Guarantees
//! - The remote database password is never logged or printed
//! - All remote commands are shell-quoted
//! - The SSH session is closed on every exit path

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dbpull_core::logging::init_logging;
use dbpull_core::{
    ContainerDatabase, CredentialDiscovery, DbPullError, OpenSshSession, Pipeline,
    PipelineConfig, PipelinePlan, RemoteCommand, RemoteConfig, RemoteSession,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dbpull")]
#[command(about = "Pull a production database into the local environment")]
#[command(version)]
#[command(long_about = "
dbpull - production database snapshot for local development

Connects to the production host over SSH, detects the application framework,
reads the database access from its configuration, dumps schema and data into
production.sql.gz, downloads it into the project directory, removes the remote
copy and imports it into the local <APP_NAME>_db container.

Configuration is read from flags, the environment and the project .env file.

SUPPORTED FRAMEWORKS:
- Bitrix (bitrix/.settings.php)

EXAMPLES:
  dbpull
  dbpull plan --json
  dbpull --server prod.example.com --catalog /var/www/site check
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub project: ProjectArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Dump, download and import the production database (default)
    Pull,
    /// Detect the application and show what a pull would run
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Test the SSH connection
    Check,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ProjectArgs {
    /// Local application name
    #[arg(long, env = "APP_NAME", help = "Local application name; the container is <APP_NAME>_db")]
    pub app_name: Option<String>,

    /// Tables left out of the data dump
    #[arg(
        long,
        env = "EXCLUDED_TABLES",
        default_value = "",
        hide_default_value = true,
        help = "Comma-separated tables whose rows are not dumped"
    )]
    pub excluded_tables: String,

    /// Local project directory
    #[arg(long, env = "PWD", help = "Project directory receiving production.sql.gz")]
    pub project_dir: Option<PathBuf>,

    /// Production SSH host
    #[arg(long, env = "SERVER", help = "Production SSH host")]
    pub server: Option<String>,

    /// Production SSH port
    #[arg(long, env = "PORT", help = "Production SSH port")]
    pub port: Option<u16>,

    /// Production SSH user
    #[arg(long, env = "USER_SRV", help = "Production SSH user")]
    pub user: Option<String>,

    /// Private key
    #[arg(long, env = "KEY_SRV", help = "Private key file for the SSH connection")]
    pub identity_file: Option<PathBuf>,

    /// Remote application root
    #[arg(long, env = "CATALOG_SRV", help = "Application root on the production host")]
    pub catalog: Option<String>,

    /// Skip the container liveness check
    #[arg(long, help = "Import without checking that the container is running")]
    pub skip_container_check: bool,
}

impl ProjectArgs {
    /// Builds the immutable pipeline configuration, falling back to `cwd` for
    /// the project directory.
    fn to_config(&self, cwd: &Path) -> dbpull_core::Result<PipelineConfig> {
        let server = self
            .server
            .clone()
            .ok_or_else(|| DbPullError::configuration("SERVER is not defined"))?;
        let catalog = self
            .catalog
            .clone()
            .ok_or_else(|| DbPullError::configuration("CATALOG_SRV is not defined"))?;

        let mut remote = RemoteConfig::new(server, catalog);
        if let Some(port) = self.port {
            remote = remote.with_port(port);
        }
        if let Some(user) = &self.user {
            remote = remote.with_user(user);
        }
        if let Some(key) = &self.identity_file {
            remote = remote.with_identity_file(key);
        }

        let config = PipelineConfig::new(
            self.app_name.clone().unwrap_or_default(),
            self.project_dir.clone().unwrap_or_else(|| cwd.to_path_buf()),
            remote,
        )
        .with_excluded_tables(PipelineConfig::parse_excluded_tables(&self.excluded_tables))
        .with_container_check(!self.skip_container_check);

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine the current directory")?;

    // Must happen before parsing so env-backed arguments see the file.
    let env_file = cwd.join(".env");
    let env_loaded = dotenvy::from_path(&env_file);

    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    if let Err(e) = env_loaded {
        warn!(
            "{} not loaded ({}); using the process environment",
            env_file.display(),
            e
        );
    }

    let config = cli.project.to_config(&cwd)?;

    match cli.command.unwrap_or(Command::Pull) {
        Command::Pull => pull(&config).await,
        Command::Plan { json } => plan(&config, json).await,
        Command::Check => check(&config).await,
    }
}

async fn connect(config: &PipelineConfig) -> Result<OpenSshSession> {
    info!("Connecting to {}", config.remote.destination());
    let session = OpenSshSession::connect(&config.remote).await?;
    Ok(session)
}

/// Runs the full pipeline
async fn pull(config: &PipelineConfig) -> Result<()> {
    let discovery = CredentialDiscovery::default();
    let session = connect(config).await?;
    let database = ContainerDatabase::default();

    let report = Pipeline::new(config, &discovery)
        .run(&session, &database)
        .await?;

    info!("✓ Pull completed in {}s", report.elapsed().num_seconds());
    println!("Database pull completed");
    println!("Framework: {}", report.framework);
    println!("Artifact: {}", report.artifact.local_path.display());

    if !report.is_clean() {
        eprintln!("Completed with {} recovered failure(s):", report.recovered.len());
        for failure in &report.recovered {
            eprintln!("  - {failure}");
        }
    }

    Ok(())
}

/// Runs detection and prints the commands a pull would issue
async fn plan(config: &PipelineConfig, json: bool) -> Result<()> {
    let discovery = CredentialDiscovery::default();
    let session = connect(config).await?;

    let plan = Pipeline::new(config, &discovery).plan(&session).await?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&plan).context("Failed to serialize the plan")?;
        println!("{rendered}");
    } else {
        print_plan(&plan);
    }

    Ok(())
}

fn print_plan(plan: &PipelinePlan) {
    println!("Framework: {}", plan.framework);
    println!("Database: {}", plan.database);
    if !plan.excluded_tables.is_empty() {
        println!("Excluded tables: {}", plan.excluded_tables.join(", "));
    }
    println!("Remote commands:");
    for command in &plan.remote_commands {
        println!("  {command}");
    }
    println!("Download: {} -> {}", plan.remote_artifact, plan.local_artifact.display());
    println!("Import into: {}", plan.container);
    println!("Fixup statements:");
    for statement in &plan.fixup_statements {
        println!("  {statement}");
    }
}

/// Tests the SSH connection without touching either database
async fn check(config: &PipelineConfig) -> Result<()> {
    let session = connect(config).await?;

    let outcome = session.run(&RemoteCommand::new().raw("true")).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close remote session: {}", e);
    }
    let output = outcome?;

    if !output.success() {
        anyhow::bail!("Remote shell check failed: {}", output.summary());
    }

    info!("✓ Connection test successful");
    println!("Connection to {} successful", config.remote.destination());
    Ok(())
}
