//! Exclusive advisory lock over a volume.
//!
//! The lock is a marker file created with exclusive-create semantics in the
//! volume root. It is removed when the [`VolumeLock`] guard is dropped, which
//! covers normal completion, errors and cancellation alike. A crashed run
//! leaves the marker behind; operators remove it by hand.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RegistratorError, Result};

/// File name of the lock marker inside the volume root.
pub const LOCK_FILE_NAME: &str = ".blob-registrator.lock";

/// Holder information stored in the marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Process id of the holder.
    pub pid: u32,
    /// Epoch seconds when the lock was taken.
    pub since_secs: u64,
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {} since {}", self.pid, self.since_secs)
    }
}

/// Guard holding the volume lock.
#[derive(Debug)]
pub struct VolumeLock {
    path: PathBuf,
}

impl VolumeLock {
    /// Takes the lock on `volume`, failing immediately if another run holds it.
    pub fn acquire(volume: &Path) -> Result<Self> {
        let path = volume.join(LOCK_FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read(&path)
                    .ok()
                    .and_then(|raw| serde_json::from_slice::<LockHolder>(&raw).ok())
                    .map(|h| h.to_string());
                return Err(RegistratorError::LockHeld { path, holder });
            }
            Err(source) => return Err(RegistratorError::Lock { path, source }),
        };

        let holder = LockHolder {
            pid: std::process::id(),
            since_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        // The guard owns the marker from here on, so a failed write still
        // removes it on drop.
        let guard = Self { path };
        let payload = serde_json::to_vec(&holder).map_err(io::Error::from)?;
        file.write_all(&payload)
            .and_then(|_| file.sync_all())
            .map_err(|source| RegistratorError::Lock {
                path: guard.path.clone(),
                source,
            })?;

        info!(path = %guard.path.display(), %holder, "volume locked");
        Ok(guard)
    }

    /// Path of the marker.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VolumeLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "volume unlocked"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "cannot remove volume lock"),
        }
    }
}
