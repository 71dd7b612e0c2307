//! Core pipeline for dbpull.
//!
//! Pulls a production database snapshot into a local containerized
//! environment: detect the application framework on the remote host, read its
//! database access from the framework configuration, dump schema and data
//! into one compressed artifact, download it, remove the remote copy, and
//! import it into the local `<app>_db` container.
//!
//! # Security Guarantees
//! - Remote database passwords are held in zeroizing containers
//! - Passwords never appear in logs, `Debug` output or error messages
//! - Every value interpolated into a remote command is shell-quoted
//! - The remote session is closed on every exit path
//!
//! # Architecture
//! - Strategy pattern for framework detection (`detection`)
//! - Trait seams at both hosts (`RemoteSession`, `LocalDatabase`) so the
//!   orchestrator runs against fakes in tests
//! - Explicit, immutable configuration passed by reference to every stage

pub mod config;
pub mod detection;
pub mod dump;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod shell;
pub mod transfer;

// Re-export commonly used types
pub use config::{PipelineConfig, RemoteConfig};
pub use detection::{BitrixDetector, CredentialDiscovery, FrameworkDetector};
pub use dump::DumpGenerator;
pub use error::{DbPullError, Result};
pub use import::{ContainerDatabase, LocalDatabase};
pub use models::{DatabaseCredentials, DumpArtifact, ImportTarget};
pub use pipeline::{Pipeline, PipelineFailure, PipelinePlan, PipelineReport, PipelineStage};
pub use session::{CommandOutput, OpenSshSession, RemoteSession};
pub use shell::RemoteCommand;
pub use transfer::Transfer;
