//! Static partitioning of mutation points across worker threads.

use crate::task::{ExecutionContext, MutantExecutionTask, MutationResult};
use mutjit_ir::MutationPoint;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tracing::{info, instrument, warn};

/// Split `items` into at most `workers` contiguous, non-empty slices whose
/// lengths differ by at most one
pub fn partition<T>(items: &[T], workers: usize) -> Vec<&[T]> {
    if items.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, items.len());
    let base = items.len() / workers;
    let extra = items.len() % workers;

    let mut slices = Vec::with_capacity(workers);
    let mut start = 0;
    for worker in 0..workers {
        let len = base + usize::from(worker < extra);
        slices.push(&items[start..start + len]);
        start += len;
    }
    slices
}

/// Runs mutation points on a fixed pool of worker threads
pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute every point and return all results.
    ///
    /// Each worker owns its loader and trampolines. Results keep slice
    /// order within a worker; the order across workers is unspecified.
    #[instrument(skip_all, fields(points = points.len(), workers = self.workers))]
    pub fn run(&self, context: &ExecutionContext<'_>, points: &[Arc<MutationPoint>]) -> Vec<MutationResult> {
        let slices = partition(points, self.workers);
        let expected = points.iter().map(|p| p.reachable_tests.len()).sum();
        let results = Mutex::new(Vec::with_capacity(expected));

        info!(slices = slices.len(), "scheduling mutation points");
        thread::scope(|scope| {
            for (worker, slice) in slices.into_iter().enumerate() {
                let results = &results;
                let work = move || {
                    let slice_results = MutantExecutionTask::new(context).execute(worker, slice);
                    results.lock().extend(slice_results);
                };
                let spawned = thread::Builder::new()
                    .name(format!("mutjit-worker-{}", worker))
                    .spawn_scoped(scope, work);
                if let Err(e) = spawned {
                    warn!(worker, error = %e, "failed to spawn worker thread, running slice inline");
                    work();
                }
            }
        });

        results.into_inner()
    }
}
