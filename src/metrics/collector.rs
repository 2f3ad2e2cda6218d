use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe flush bookkeeping for one gear.
/// The tracker records outcomes, `/rest/status` reads snapshots.
pub struct FlushStats {
    inner: Mutex<Inner>,
}

/// Store write latency breakdown (μs).
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p99: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushStatsSnapshot {
    /// Records written
    pub flushes: u64,
    /// Store writes that failed and were re-buffered
    pub failures: u64,
    /// Flushes skipped because the window was empty
    pub skipped_empty: u64,
    /// Sum of hits across written records
    pub hits_persisted: u64,
    /// Timestamp (ms) of the last written record
    pub last_flush_ms: Option<i64>,
    pub store_write_us: LatencySummary,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    flushes: u64,
    failures: u64,
    skipped_empty: u64,
    hits_persisted: u64,
    last_flush_ms: Option<i64>,
    write_hist: Histogram<u64>,
}

// ─── FlushStats impl ─────────────────────────────────────────────

impl FlushStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                flushes: 0,
                failures: 0,
                skipped_empty: 0,
                hits_persisted: 0,
                last_flush_ms: None,
                write_hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                    .expect("histogram creation"),
            }),
        }
    }

    pub fn record_flush(&self, hits: u64, timestamp_ms: i64, write_us: u64) {
        let mut inner = self.inner.lock();
        inner.flushes += 1;
        inner.hits_persisted += hits;
        inner.last_flush_ms = Some(timestamp_ms);
        // clamp to ≥ 1 μs, saturate at the top of the range
        let _ = inner.write_hist.record(write_us.clamp(HIST_LOW, HIST_HIGH));
    }

    pub fn record_failure(&self) {
        self.inner.lock().failures += 1;
    }

    pub fn record_skip(&self) {
        self.inner.lock().skipped_empty += 1;
    }

    pub fn snapshot(&self) -> FlushStatsSnapshot {
        let inner = self.inner.lock();
        FlushStatsSnapshot {
            flushes: inner.flushes,
            failures: inner.failures,
            skipped_empty: inner.skipped_empty,
            hits_persisted: inner.hits_persisted,
            last_flush_ms: inner.last_flush_ms,
            store_write_us: LatencySummary::from_histogram(&inner.write_hist),
        }
    }
}

impl Default for FlushStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencySummary {
    /// Zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self {
                min: 0,
                max: 0,
                mean: 0.0,
                p50: 0,
                p99: 0,
                count: 0,
            };
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_percentile(50.0),
            p99: hist.value_at_percentile(99.0),
            count: hist.len(),
        }
    }
}
