//! Run progress shared between workers.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Monotonic count of mutation points whose tests have all been recorded.
///
/// Workers only increment; readers see every increment made before the
/// workers were joined.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicUsize,
    total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    pub fn increment(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Completed share in `[0, 1]`; an empty run counts as done
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed() as f64 / self.total as f64
        }
    }
}
