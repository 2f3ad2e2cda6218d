use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::accumulator::Pending;
use crate::store::RecordStore;
use crate::tracker::HitTracker;

/// When a gear writes its buffered hits to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Checked on every hit: flush once the open window is older than this.
    /// A quiet gear does not flush at all, there is nothing to persist.
    Elapsed(Duration),
    /// Checked on every hit: flush once this many hits are pending.
    Count(u64),
    /// A background task flushes at this cadence regardless of traffic.
    Scheduled(Duration),
}

impl FlushPolicy {
    /// Default elapsed threshold: half a second of buffering per gear.
    pub const DEFAULT_ELAPSED: Duration = Duration::from_millis(500);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_COUNT: u64 = 100;

    /// Whether a request-driven flush is due for this window.
    pub fn is_due(&self, pending: &Pending) -> bool {
        match *self {
            Self::Elapsed(threshold) => pending.age > threshold,
            Self::Count(threshold) => pending.hits >= threshold,
            Self::Scheduled(_) => false,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match *self {
            Self::Scheduled(interval) => Some(interval),
            _ => None,
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::Elapsed(Self::DEFAULT_ELAPSED)
    }
}

impl std::fmt::Display for FlushPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elapsed(d) => write!(f, "elapsed({}ms)", d.as_millis()),
            Self::Count(n) => write!(f, "count({n})"),
            Self::Scheduled(d) => write!(f, "scheduled({}ms)", d.as_millis()),
        }
    }
}

/// Background task driving [`FlushPolicy::Scheduled`].
pub struct FlushScheduler {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    /// Starts the timer task. The first flush happens one interval from now.
    pub fn start<S: RecordStore>(tracker: Arc<HitTracker<S>>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "Flush scheduler started");

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            // A slow store delays the next tick instead of bursting
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.notified() => break,
                }

                // Failures are logged and re-buffered by the tracker
                let _ = tracker.flush().await;
            }

            tracing::info!("Flush scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Stops the timer and waits for an in-flight flush to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Flush scheduler task failed");
        }
    }
}
