//! Error types for the blob registrator.
//!
//! Errors are split by blast radius: [`RegistratorError`] aborts a run before
//! or during enumeration, while [`MetaError`] and [`ChunkReadError`] only ever
//! fail the chunk they were raised for.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for run-level operations.
pub type Result<T> = std::result::Result<T, RegistratorError>;

/// Result type alias for metadata service calls.
pub type MetaResult<T> = std::result::Result<T, MetaError>;

/// Fatal errors that terminate a registrator run.
#[derive(Debug, Error)]
pub enum RegistratorError {
    /// The volume root cannot be enumerated.
    #[error("cannot read volume {path}: {source}")]
    VolumeRead {
        /// Volume root that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Another run already holds the volume lock.
    #[error("volume {path} is locked by another run{}", holder_suffix(.holder))]
    LockHeld {
        /// Path of the lock marker.
        path: PathBuf,
        /// Holder description read from the marker, if readable.
        holder: Option<String>,
    },

    /// The lock marker could not be created for a reason other than contention.
    #[error("cannot lock volume {path}: {source}")]
    Lock {
        /// Path of the lock marker.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wraps standard I/O errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(h) => format!(" ({h})"),
        None => String::new(),
    }
}

/// Errors returned by a [`crate::client::MetadataClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    /// The content or chunk is unknown to the service.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The chunk already exists with a different position or location.
    #[error("conflict on chunk {chunk_id}: {reason}")]
    Conflict {
        /// Conflicting chunk id.
        chunk_id: String,
        /// Service-provided explanation.
        reason: String,
    },

    /// The namespace disallows the operation.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// Service-provided explanation.
        reason: String,
    },

    /// Transient network or service failure.
    #[error("service unavailable: {reason}")]
    ServiceUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// Unexpected response from the service.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Check if a metadata error is worth retrying.
///
/// Only [`MetaError::ServiceUnavailable`] is transient; every other variant
/// is a permanent answer from the service.
pub fn is_retryable(error: &MetaError) -> bool {
    match error {
        MetaError::ServiceUnavailable { .. } => true,
        MetaError::NotFound { .. } => false,
        MetaError::Conflict { .. } => false,
        MetaError::PermissionDenied { .. } => false,
        MetaError::Protocol(_) => false,
    }
}

/// A volume entry that could not be turned into a chunk descriptor.
#[derive(Debug, Error)]
pub enum ChunkReadError {
    /// The walker could not visit the entry.
    #[error("cannot walk {path}: {reason}")]
    Walk {
        /// Entry path.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// Extended attributes could not be read.
    #[error("cannot read attributes of {path}: {source}")]
    Xattr {
        /// Chunk path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required attribute is absent.
    #[error("chunk {path} has no attribute {name}")]
    MissingAttribute {
        /// Chunk path.
        path: PathBuf,
        /// Attribute name.
        name: &'static str,
    },

    /// An attribute holds an unparsable value.
    #[error("chunk {path} has invalid attribute {name}={value:?}")]
    InvalidAttribute {
        /// Chunk path.
        path: PathBuf,
        /// Attribute name.
        name: &'static str,
        /// Raw value, lossily decoded.
        value: String,
    },
}

impl ChunkReadError {
    /// Path of the entry this error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            ChunkReadError::Walk { path, .. }
            | ChunkReadError::Xattr { path, .. }
            | ChunkReadError::MissingAttribute { path, .. }
            | ChunkReadError::InvalidAttribute { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&MetaError::ServiceUnavailable {
            reason: "connection reset".to_string()
        }));

        assert!(!is_retryable(&MetaError::NotFound {
            what: "content".to_string()
        }));
        assert!(!is_retryable(&MetaError::Conflict {
            chunk_id: "AB".to_string(),
            reason: "exists".to_string()
        }));
        assert!(!is_retryable(&MetaError::PermissionDenied {
            reason: "worm".to_string()
        }));
        assert!(!is_retryable(&MetaError::Protocol("bad json".to_string())));
    }

    #[test]
    fn test_lock_held_message() {
        let err = RegistratorError::LockHeld {
            path: PathBuf::from("/srv/rawx/.blob-registrator.lock"),
            holder: Some("pid 42".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/srv/rawx"));
        assert!(msg.contains("pid 42"));

        let err = RegistratorError::LockHeld {
            path: PathBuf::from("/srv/rawx/.blob-registrator.lock"),
            holder: None,
        };
        assert!(err.to_string().ends_with("locked by another run"));
    }

    #[test]
    fn test_chunk_read_error_path() {
        let err = ChunkReadError::MissingAttribute {
            path: PathBuf::from("/srv/rawx/ABC/ABCDEF"),
            name: "user.grid.chunk.position",
        };
        assert_eq!(err.path(), std::path::Path::new("/srv/rawx/ABC/ABCDEF"));
        assert!(err.to_string().contains("user.grid.chunk.position"));
    }

    #[test]
    fn test_conflict_display() {
        let err = MetaError::Conflict {
            chunk_id: "0123ABCD".to_string(),
            reason: "position 1 != 2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "conflict on chunk 0123ABCD: position 1 != 2"
        );
    }
}
