//! Reconciliation engine.
//!
//! Each volume entry goes through filter, lookup, act and record. The action
//! mode is fixed when the engine is built; per chunk the engine issues at most
//! one mutating call, and a chunk failure never stops the scan.
//!
//! Lookups run concurrently on the worker pool. Mutating calls go through a
//! single gate shared by every clone of the engine, so the metadata service
//! never sees two of them at once.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::chunk::{ChunkDescriptor, ChunkReport, MetadataRecord, Mutation, Outcome};
use crate::client::MetadataClient;
use crate::context::ScanContext;
use crate::error::{MetaError, Result};
use crate::retry::{RetryConfig, RetryExecutor, RetryOutcome};
use crate::source::{ChunkItem, ChunkSource};
use crate::state::{RunSnapshot, RunState};

/// What `update` mode does with a chunk the service does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// The chunk is reported as failed; an update never creates a record.
    #[default]
    RequireExisting,
    /// The chunk is inserted.
    Create,
}

/// Action applied to classified chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionMode {
    /// Observe only.
    #[default]
    Check,
    /// Register missing chunks, never overwrite existing records.
    Insert,
    /// Rewrite divergent records.
    Update(MissingPolicy),
}

impl ActionMode {
    /// Resolves command-line flags: insert wins over update, check is the default.
    pub fn from_flags(insert: bool, update: bool, missing: MissingPolicy) -> Self {
        if insert {
            ActionMode::Insert
        } else if update {
            ActionMode::Update(missing)
        } else {
            ActionMode::Check
        }
    }

    /// Returns true if the mode may issue mutating calls.
    pub fn mutates(&self) -> bool {
        !matches!(self, ActionMode::Check)
    }
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionMode::Check => write!(f, "check"),
            ActionMode::Insert => write!(f, "insert"),
            ActionMode::Update(MissingPolicy::RequireExisting) => write!(f, "update"),
            ActionMode::Update(MissingPolicy::Create) => write!(f, "update+create"),
        }
    }
}

/// Upper bound on `workers`.
pub const MAX_WORKERS: usize = 1024;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Action applied to classified chunks.
    pub mode: ActionMode,
    /// Also handle chunks of the first metachunk.
    pub first: bool,
    /// Concurrent chunks in flight.
    pub workers: usize,
    /// Log per-chunk lines at debug level instead of info.
    pub quiet: bool,
    /// Lookup retry policy.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ActionMode::Check,
            first: false,
            workers: 4,
            quiet: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Final counters.
    pub snapshot: RunSnapshot,
    /// True if the run stopped on cancellation before the volume was exhausted.
    pub cancelled: bool,
}

enum Classification {
    Present,
    Missing,
    Divergent,
}

/// Reconciles volume entries against the metadata service.
#[derive(Clone)]
pub struct ReconciliationEngine {
    ctx: Arc<ScanContext>,
    client: Arc<dyn MetadataClient>,
    config: Arc<EngineConfig>,
    retry: RetryExecutor,
    state: Arc<RunState>,
    mutation_gate: Arc<Mutex<()>>,
}

impl ReconciliationEngine {
    /// Creates an engine with fresh counters.
    pub fn new(ctx: Arc<ScanContext>, client: Arc<dyn MetadataClient>, config: EngineConfig) -> Self {
        let retry = RetryExecutor::new(config.retry.clone());
        Self {
            ctx,
            client,
            config: Arc::new(config),
            retry,
            state: Arc::new(RunState::new()),
            mutation_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Shared counters, for the progress reporter.
    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Action mode in effect.
    pub fn mode(&self) -> ActionMode {
        self.config.mode
    }

    /// Classifies one chunk and applies the configured action.
    ///
    /// Does not touch the run counters; see [`Self::process`].
    pub async fn reconcile(&self, desc: &ChunkDescriptor) -> ChunkReport {
        if desc.position.is_first() && !self.config.first {
            return report(desc, Outcome::Skipped, Mutation::None, None);
        }

        let local = desc.to_record(self.ctx.service_id());
        let classification = match self.classify(desc, &local).await {
            Ok(c) => c,
            Err(err) => return report(desc, Outcome::Failed, Mutation::None, Some(err)),
        };

        match (self.config.mode, classification) {
            (ActionMode::Check, c) => report(desc, c.outcome(), Mutation::None, None),
            (ActionMode::Insert, Classification::Missing)
            | (ActionMode::Update(MissingPolicy::Create), Classification::Missing) => {
                let _gate = self.mutation_gate.lock().await;
                match self.client.insert(&local).await {
                    Ok(()) => report(desc, Outcome::Missing, Mutation::Inserted, None),
                    Err(err) => report(desc, Outcome::Failed, Mutation::None, Some(err.to_string())),
                }
            }
            (ActionMode::Update(MissingPolicy::RequireExisting), Classification::Missing) => report(
                desc,
                Outcome::Failed,
                Mutation::None,
                Some("no record to update".to_string()),
            ),
            (ActionMode::Update(_), Classification::Divergent) => {
                let _gate = self.mutation_gate.lock().await;
                match self.client.update(&local).await {
                    Ok(()) => report(desc, Outcome::Divergent, Mutation::Updated, None),
                    Err(err) => report(desc, Outcome::Failed, Mutation::None, Some(err.to_string())),
                }
            }
            (_, c) => report(desc, c.outcome(), Mutation::None, None),
        }
    }

    async fn classify(&self, desc: &ChunkDescriptor, local: &MetadataRecord) -> std::result::Result<Classification, String> {
        let outcome = self
            .retry
            .execute(|| self.client.lookup(&desc.container_id, &desc.content_id))
            .await;

        match outcome {
            RetryOutcome::Success(records) => {
                let remote = records
                    .iter()
                    .find(|r| r.chunk_id.eq_ignore_ascii_case(&local.chunk_id));
                Ok(match remote {
                    None => Classification::Missing,
                    Some(r) if r.agrees_with(local) => Classification::Present,
                    Some(r) => {
                        debug!(
                            chunk = %local.chunk_id,
                            recorded_location = %r.location,
                            recorded_size = r.size,
                            recorded_position = %r.position,
                            "record differs from volume"
                        );
                        Classification::Divergent
                    }
                })
            }
            RetryOutcome::Exhausted {
                last_error: MetaError::NotFound { .. },
                ..
            } => Ok(Classification::Missing),
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(format!("lookup failed after {attempts} attempt(s): {last_error}")),
        }
    }

    /// Reconciles one source item and records it in the run counters.
    pub async fn process(&self, item: ChunkItem) -> ChunkReport {
        let report = match item {
            Ok(desc) => self.reconcile(&desc).await,
            Err(err) => ChunkReport {
                path: err.path().to_path_buf(),
                chunk_id: None,
                outcome: Outcome::Failed,
                mutation: Mutation::None,
                error: Some(err.to_string()),
            },
        };
        self.state.record(&report);
        self.log_report(&report);
        report
    }

    fn log_report(&self, report: &ChunkReport) {
        let chunk = report.chunk_id.as_deref().unwrap_or("-");
        let path = report.path.display();
        match (&report.error, self.config.quiet) {
            (Some(err), _) => warn!(%path, chunk, outcome = %report.outcome, error = %err, "chunk failed"),
            (None, true) => debug!(%path, chunk, outcome = %report.outcome, mutation = ?report.mutation, "chunk reconciled"),
            (None, false) => info!(%path, chunk, outcome = %report.outcome, mutation = ?report.mutation, "chunk reconciled"),
        }
    }

    /// Reconciles every entry of `source` on the worker pool.
    ///
    /// Fails only if the source cannot start enumerating. On cancellation no
    /// new entry is dispatched, in-flight entries are allowed to finish, and
    /// the summary is flagged as cancelled.
    pub async fn run(&self, source: &dyn ChunkSource, cancel: CancellationToken) -> Result<RunSummary> {
        let span = self.ctx.span().clone();
        let iter = source.scan()?;
        let workers = self.config.workers.clamp(1, MAX_WORKERS);

        info!(parent: &span, mode = %self.config.mode, first = self.config.first, workers, "starting reconciliation");

        let (tx, mut rx) = mpsc::channel::<ChunkItem>(workers.saturating_mul(2));
        let producer_cancel = cancel.clone();
        let walker_span = span.clone();
        let producer = tokio::task::spawn_blocking(move || {
            let _entered = walker_span.enter();
            for item in iter {
                if producer_cancel.is_cancelled() || tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut seq = 0u64;
        let mut cancelled = false;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let path = match &item {
                Ok(desc) => desc.path.clone(),
                Err(err) => err.path().to_path_buf(),
            };
            self.state.checkpoint().begin(seq, &path);

            let engine = self.clone();
            let this_seq = seq;
            tasks.spawn(
                async move {
                    let _permit = permit;
                    engine.process(item).await;
                    engine.state.checkpoint().finish(this_seq);
                }
                .instrument(span.clone()),
            );
            seq += 1;

            while let Some(res) = tasks.try_join_next() {
                if let Err(err) = res {
                    error!(parent: &span, error = %err, "chunk task aborted");
                }
            }
        }

        drop(rx);
        if cancelled {
            warn!(parent: &span, in_flight = tasks.len(), "cancellation requested, draining in-flight chunks");
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(err) = res {
                error!(parent: &span, error = %err, "chunk task aborted");
            }
        }
        if let Err(err) = producer.await {
            error!(parent: &span, error = %err, "volume walker aborted");
        }

        Ok(RunSummary {
            snapshot: self.state.snapshot(),
            cancelled,
        })
    }
}

impl Classification {
    fn outcome(&self) -> Outcome {
        match self {
            Classification::Present => Outcome::Present,
            Classification::Missing => Outcome::Missing,
            Classification::Divergent => Outcome::Divergent,
        }
    }
}

fn report(desc: &ChunkDescriptor, outcome: Outcome, mutation: Mutation, error: Option<String>) -> ChunkReport {
    ChunkReport {
        path: desc.path.clone(),
        chunk_id: Some(desc.chunk_id.clone()),
        outcome,
        mutation,
        error,
    }
}
