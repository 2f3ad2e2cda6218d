use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// In-memory hit buffer of one gear.
///
/// Holds the hits received since the last flush and the instant that window
/// opened. The pair lives behind a single mutex, so [`Accumulator::drain`]
/// reads and resets it atomically with respect to concurrent
/// [`Accumulator::add`] calls: every hit lands either in the drained window
/// or in the next one, never both and never neither.
pub struct Accumulator {
    window: Mutex<Window>,
}

struct Window {
    pending: u64,
    started: Instant,
}

/// View of the open window, taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub hits: u64,
    pub age: Duration,
}

/// Contents of a closed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    pub hits: u64,
    pub window: Duration,
}

impl Accumulator {
    /// Opens the first window: no pending hits, started now.
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                pending: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Counts one hit and returns the window as it stands right after it.
    pub fn add(&self) -> Pending {
        let mut w = self.window.lock();
        w.pending += 1;
        Pending {
            hits: w.pending,
            age: w.started.elapsed(),
        }
    }

    pub fn snapshot(&self) -> Pending {
        let w = self.window.lock();
        Pending {
            hits: w.pending,
            age: w.started.elapsed(),
        }
    }

    pub fn pending(&self) -> u64 {
        self.window.lock().pending
    }

    /// Closes the open window and starts a fresh one.
    pub fn drain(&self) -> Drained {
        let mut w = self.window.lock();
        let now = Instant::now();
        let drained = Drained {
            hits: std::mem::take(&mut w.pending),
            window: now.duration_since(w.started),
        };
        w.started = now;
        drained
    }

    /// Puts hits from a failed flush back into the open window.
    /// The window start is left alone so the retry is not delayed.
    pub fn restore(&self, hits: u64) {
        let mut w = self.window.lock();
        w.pending = w.pending.saturating_add(hits);
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}
