use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::accumulator::{Accumulator, Pending};
use crate::error::StoreError;
use crate::flusher::FlushPolicy;
use crate::metrics::FlushStats;
use crate::store::{FlushRecord, RecordStore, StoredRecord};

/// Write side of one gear: buffers hits and persists them per [`FlushPolicy`].
///
/// Created once at startup (no pending hits, window opened now) and shared
/// by reference with everything that counts hits. On shutdown call
/// [`HitTracker::flush`] once more; hits that arrive after it, or that a
/// crash takes with it, are lost.
pub struct HitTracker<S> {
    instance_id: String,
    store: Arc<S>,
    accumulator: Accumulator,
    policy: FlushPolicy,
    skip_empty: bool,
    /// Serializes flushes. Holds the timestamp of the last record written so
    /// the next one can be stamped strictly later.
    flush_guard: Mutex<i64>,
    stats: Arc<FlushStats>,
}

impl<S: RecordStore> HitTracker<S> {
    pub fn new(
        instance_id: impl Into<String>,
        store: Arc<S>,
        policy: FlushPolicy,
        skip_empty: bool,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            store,
            accumulator: Accumulator::new(),
            policy,
            skip_empty,
            flush_guard: Mutex::new(i64::MIN),
            stats: Arc::new(FlushStats::new()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn skip_empty(&self) -> bool {
        self.skip_empty
    }

    pub fn pending(&self) -> u64 {
        self.accumulator.pending()
    }

    pub fn stats(&self) -> &Arc<FlushStats> {
        &self.stats
    }

    /// Counts one hit. Never fails: a due flush that cannot reach the store
    /// keeps the hits buffered for the next window.
    pub async fn add(&self) {
        let pending = self.accumulator.add();
        if self.policy.is_due(&pending) {
            self.flush_if_due().await;
        }
    }

    /// Request-driven flush. Does not queue behind a flush already running:
    /// those hits simply land in the next window.
    async fn flush_if_due(&self) {
        let Ok(guard) = self.flush_guard.try_lock() else {
            return;
        };
        // Another caller may have flushed between our add and the lock
        if !self.policy.is_due(&self.accumulator.snapshot()) {
            return;
        }
        let _ = self.flush_locked(guard).await;
    }

    /// Drains the open window and writes it as one record.
    ///
    /// Returns `Ok(None)` when the window was empty and empty flushes are
    /// skipped. On a store error the drained hits are put back into the
    /// accumulator before the error is returned.
    pub async fn flush(&self) -> Result<Option<StoredRecord>, StoreError> {
        let guard = self.flush_guard.lock().await;
        self.flush_locked(guard).await
    }

    async fn flush_locked(
        &self,
        mut last_timestamp: MutexGuard<'_, i64>,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let drained = self.accumulator.drain();

        if drained.hits == 0 && self.skip_empty {
            self.stats.record_skip();
            return Ok(None);
        }

        let timestamp = next_timestamp(*last_timestamp).await;
        // Claimed even if the write fails: the store may have applied it
        *last_timestamp = timestamp;

        let record = FlushRecord {
            instance_id: self.instance_id.clone(),
            hits: drained.hits,
            timestamp,
        };

        let started = Instant::now();
        match self.store.insert(&record).await {
            Ok(stored) => {
                let write_us = started.elapsed().as_micros() as u64;
                self.stats.record_flush(stored.hits, stored.timestamp, write_us);
                tracing::debug!(
                    gear = %self.instance_id,
                    id = stored.id,
                    hits = stored.hits,
                    window_ms = drained.window.as_millis() as u64,
                    write_us,
                    "Flushed hits"
                );
                Ok(Some(stored))
            }
            Err(e) => {
                self.accumulator.restore(drained.hits);
                self.stats.record_failure();
                tracing::warn!(
                    gear = %self.instance_id,
                    hits = drained.hits,
                    error = %e,
                    "Flush failed, hits re-buffered for the next window"
                );
                Err(e)
            }
        }
    }

    /// Current view of the open window.
    pub fn window(&self) -> Pending {
        self.accumulator.snapshot()
    }
}

/// Wall-clock milliseconds strictly after `last`.
///
/// Never stamps ahead of the clock: a flush landing in the same millisecond
/// as the previous one waits for the clock to move on. Callers hold the
/// flush lock, so the wait also holds back the next flush.
async fn next_timestamp(last: i64) -> i64 {
    loop {
        let now = chrono::Utc::now().timestamp_millis();
        if now > last {
            return now;
        }
        let behind = (last - now + 1) as u64;
        if behind > 1_000 {
            tracing::warn!(behind_ms = behind, "Wall clock moved back, delaying flush");
        }
        tokio::time::sleep(Duration::from_millis(behind)).await;
    }
}
