//! Artifact download and remote cleanup.
//!
//! A failed download is fatal and leaves the remote artifact in place for
//! manual recovery. Cleanup only runs after a successful download, and its
//! failure is recoverable.

use tracing::{info, warn};

use crate::error::{DbPullError, Result};
use crate::models::DumpArtifact;
use crate::session::RemoteSession;

/// Moves the dump artifact from the remote host to the local one.
pub struct Transfer;

impl Transfer {
    /// Downloads the artifact, replacing any existing local file.
    ///
    /// # Errors
    /// Returns a transfer error if the local directory cannot be prepared,
    /// the download fails, or the file is missing afterwards.
    pub async fn fetch(session: &dyn RemoteSession, artifact: &DumpArtifact) -> Result<()> {
        let local = &artifact.local_path;
        info!(
            "Downloading {} to {}",
            artifact.remote_path,
            local.display()
        );

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DbPullError::transfer(
                    &artifact.remote_path,
                    format!("cannot create {}: {e}", parent.display()),
                )
            })?;
        }

        match tokio::fs::remove_file(local).await {
            Ok(()) => warn!("Overwriting existing {}", local.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(DbPullError::transfer(
                    &artifact.remote_path,
                    format!("cannot replace {}: {e}", local.display()),
                ));
            }
        }

        session.fetch(&artifact.remote_path, local).await?;

        match tokio::fs::try_exists(local).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DbPullError::transfer(
                &artifact.remote_path,
                format!("download reported success but {} is missing", local.display()),
            )),
            Err(e) => Err(DbPullError::transfer(
                &artifact.remote_path,
                format!("cannot check {}: {e}", local.display()),
            )),
        }
    }

    /// Deletes the remote artifact.
    ///
    /// # Errors
    /// Returns a cleanup error if the remote file could not be removed.
    pub async fn remove_remote(session: &dyn RemoteSession, artifact: &DumpArtifact) -> Result<()> {
        info!("Cleaning up {}", artifact.remote_path);
        session.remove(&artifact.remote_path).await
    }
}
