//! Run context shared by the source, the metadata client and the engine.

use std::path::{Path, PathBuf};

use tracing::Span;

/// Identity of the run, passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct ScanContext {
    namespace: String,
    volume: PathBuf,
    service_id: String,
    span: Span,
}

impl ScanContext {
    /// Creates a context and the tracing span all run activity is recorded under.
    pub fn new(namespace: impl Into<String>, volume: impl Into<PathBuf>, service_id: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let volume = volume.into();
        let service_id = service_id.into();
        let span = tracing::info_span!(
            "registrator",
            ns = %namespace,
            volume = %volume.display(),
            service = %service_id,
        );
        Self {
            namespace,
            volume,
            service_id,
            span,
        }
    }

    /// Namespace of the cluster.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Volume root on the local filesystem.
    pub fn volume(&self) -> &Path {
        &self.volume
    }

    /// Address of the rawx service owning the volume, used to build chunk URLs.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Span for run-level logging.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
