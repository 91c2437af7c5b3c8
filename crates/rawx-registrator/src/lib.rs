#![warn(missing_docs)]

//! Blob registrator: reconcile the chunks stored on a rawx volume with the meta2 service
//!
//! The registrator walks a rawx volume, decodes the extended attributes of
//! every chunk file and compares the placement they describe with what the
//! metadata service records. In check mode it only reports; in insert mode it
//! registers chunks the service does not know; in update mode it rewrites
//! records that point elsewhere.

pub mod chunk;
pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod lock;
pub mod logging;
pub mod proxy;
pub mod reporter;
pub mod retry;
pub mod source;
pub mod state;

pub use chunk::{ChunkDescriptor, ChunkPosition, ChunkReport, MetadataRecord, Mutation, Outcome};
pub use client::{CallCounts, MemoryMetadataClient, MetadataClient};
pub use config::RegistratorConfig;
pub use context::ScanContext;
pub use engine::{ActionMode, EngineConfig, MissingPolicy, ReconciliationEngine, RunSummary};
pub use error::{ChunkReadError, MetaError, MetaResult, RegistratorError, Result};
pub use lock::VolumeLock;
pub use logging::{LogConfig, LogFacility};
pub use proxy::ProxyMetadataClient;
pub use reporter::ProgressReporter;
pub use retry::{RetryConfig, RetryExecutor, RetryOutcome};
pub use source::{ChunkSource, StaticChunkSource, VolumeChunkSource};
pub use state::{Checkpoint, RunSnapshot, RunState};
