//! Error taxonomy for the snapshot-and-import pipeline.
//!
//! Every variant maps to one pipeline stage. Messages carry the remote or
//! local tool's own diagnostics, but never a database password: commands are
//! rendered through [`crate::shell::RemoteCommand::redacted`] before they are
//! placed into an error.

use thiserror::Error;

/// Main error type for dbpull operations.
///
/// # Propagation
/// [`DbPullError::is_fatal`] decides whether the orchestrator aborts or logs
/// the error and keeps going.
#[derive(Debug, Error)]
pub enum DbPullError {
    /// The remote session could not be established or dropped mid-command
    #[error("Connection failed: {context}")]
    Connection { context: String },

    /// Unknown framework, or the credential scrape did not yield four fields
    #[error("Framework detection failed: {reason}")]
    Detection { reason: String },

    /// The remote dump tool exited non-zero
    #[error("Database dump failed during {phase} phase: {stderr}")]
    Dump { phase: &'static str, stderr: String },

    /// Downloading the dump artifact failed
    #[error("Download of {remote_path} failed: {context}")]
    Transfer {
        remote_path: String,
        context: String,
    },

    /// Deleting the remote dump artifact failed
    #[error("Removal of remote file {remote_path} failed: {context}")]
    Cleanup {
        remote_path: String,
        context: String,
    },

    /// Streaming the dump into the local container failed
    #[error("Import into {container} failed: {context}")]
    Import { container: String, context: String },

    /// Post-import fixup statements failed
    #[error("Fixup of {container} failed: {context}")]
    Fixup { container: String, context: String },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Local I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results with DbPullError
pub type Result<T> = std::result::Result<T, DbPullError>;

impl DbPullError {
    /// Creates a connection error
    pub fn connection(context: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
        }
    }

    /// Creates a detection error
    pub fn detection(reason: impl Into<String>) -> Self {
        Self::Detection {
            reason: reason.into(),
        }
    }

    /// Creates a dump error for the named phase
    pub fn dump(phase: &'static str, stderr: impl Into<String>) -> Self {
        Self::Dump {
            phase,
            stderr: stderr.into(),
        }
    }

    /// Creates a transfer error
    pub fn transfer(remote_path: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Transfer {
            remote_path: remote_path.into(),
            context: context.into(),
        }
    }

    /// Creates a cleanup error
    pub fn cleanup(remote_path: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Cleanup {
            remote_path: remote_path.into(),
            context: context.into(),
        }
    }

    /// Creates an import error
    pub fn import(container: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Import {
            container: container.into(),
            context: context.into(),
        }
    }

    /// Creates a fixup error
    pub fn fixup(container: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Fixup {
            container: container.into(),
            context: context.into(),
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error must abort the pipeline.
    ///
    /// Cleanup, import and fixup failures are recoverable: the local snapshot
    /// already exists, so the run continues to completion.
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Cleanup { .. } | Self::Import { .. } | Self::Fixup { .. }
        )
    }
}
