pub mod accumulator;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod flusher;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod server;
pub mod store;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use aggregator::{Aggregator, ReportMode};
use store::RecordStore;
use tracker::HitTracker;

/// Shared application state available to every handler via `State<Arc<AppState<S>>>`.
pub struct AppState<S: RecordStore> {
    /// This gear's accumulator and flush trigger.
    pub tracker: Arc<HitTracker<S>>,

    /// Read side: folds persisted records of every gear into reports.
    pub aggregator: Aggregator<S>,

    /// Mode used when a request does not ask for one.
    pub report_mode: ReportMode,

    /// Cursor behind `/rest/display`: newest record timestamp already reported.
    /// Held across the store read so concurrent polls never report a record twice.
    pub poll_cursor: tokio::sync::Mutex<i64>,

    /// Tick of the `/rest/stream` SSE feed.
    pub stream_interval: Duration,

    /// Flipped to `true` once shutdown starts; open SSE feeds end on their
    /// next tick so the server can drain.
    shutdown_tx: watch::Sender<bool>,
}

impl<S: RecordStore> AppState<S> {
    pub fn new(
        tracker: Arc<HitTracker<S>>,
        aggregator: Aggregator<S>,
        report_mode: ReportMode,
        stream_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            aggregator,
            report_mode,
            // Records stamped in the startup millisecond still count
            poll_cursor: tokio::sync::Mutex::new(chrono::Utc::now().timestamp_millis() - 1),
            stream_interval,
            shutdown_tx: watch::channel(false).0,
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
