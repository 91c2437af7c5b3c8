//! Periodic progress reports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument, Span};

use crate::state::{RunSnapshot, RunState};

/// Logs a [`RunSnapshot`] every `interval` while a scan runs.
pub struct ProgressReporter {
    state: Arc<RunState>,
    interval: Duration,
    emitted: Arc<AtomicU64>,
}

impl ProgressReporter {
    /// Creates a reporter; a zero or unrepresentable interval disables
    /// periodic reports.
    pub fn new(state: Arc<RunState>, interval: Duration) -> Self {
        Self {
            state,
            interval,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of periodic reports emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Logs one report line for `snapshot`.
    pub fn log_snapshot(snapshot: &RunSnapshot, label: &str) {
        info!(
            scanned = snapshot.scanned,
            ok = snapshot.ok,
            missing = snapshot.missing,
            divergent = snapshot.divergent,
            skipped = snapshot.skipped,
            inserted = snapshot.inserted,
            updated = snapshot.updated,
            failed = snapshot.failed,
            elapsed_secs = snapshot.elapsed_secs,
            rate = %format!("{:.1}/s", snapshot.rate()),
            checkpoint = ?snapshot.checkpoint,
            "{}", label
        );
    }

    /// Spawns the reporting loop; it stops when `cancel` fires.
    ///
    /// The first report is emitted one full interval after the start.
    pub fn spawn(&self, cancel: CancellationToken, span: Span) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let emitted = Arc::clone(&self.emitted);
        let period = self.interval;

        tokio::spawn(
            async move {
                let start = match tokio::time::Instant::now().checked_add(period) {
                    Some(start) if !period.is_zero() => start,
                    _ => {
                        cancel.cancelled().await;
                        return;
                    }
                };
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            Self::log_snapshot(&state.snapshot(), "progress");
                            emitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_interval() {
        let state = Arc::new(RunState::new());
        let reporter = ProgressReporter::new(Arc::clone(&state), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let handle = reporter.spawn(cancel.clone(), Span::none());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(reporter.emitted(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(reporter.emitted(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(reporter.emitted(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disabled() {
        let state = Arc::new(RunState::new());
        let reporter = ProgressReporter::new(state, Duration::ZERO);
        let cancel = CancellationToken::new();
        let handle = reporter.spawn(cancel.clone(), Span::none());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(reporter.emitted(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_interval_disabled() {
        let state = Arc::new(RunState::new());
        let reporter = ProgressReporter::new(state, Duration::MAX);
        let cancel = CancellationToken::new();
        let handle = reporter.spawn(cancel.clone(), Span::none());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(reporter.emitted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_cancel() {
        let state = Arc::new(RunState::new());
        let reporter = ProgressReporter::new(state, Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let handle = reporter.spawn(cancel.clone(), Span::none());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(reporter.emitted(), 0);
    }
}
