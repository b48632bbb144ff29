//! Execution of a slice of mutation points on one worker.

use crate::progress::Progress;
use mutjit_core::{
    Distance, EngineConfig, Error, ExecutionResult, ExecutionStatus, Result, TestDescriptor, TestId,
};
use mutjit_ir::{naming, MutationPoint};
use mutjit_runtime::{
    HostProcessSymbols, JitLoader, ObjectFile, ProcessSandbox, ResolverChain, Runtime,
    RuntimeOverrides, TestRunner, TrampolineTable,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// One executed (or short-circuited) test against one mutant
#[derive(Debug, Clone)]
pub struct MutationResult {
    pub point: Arc<MutationPoint>,
    pub test: TestId,
    pub distance: Distance,
    pub result: ExecutionResult,
}

/// Read-only inputs shared by every worker of a run
pub struct ExecutionContext<'a> {
    pub runtime: &'a Runtime,
    /// The mutated object set: originals, mutants and tests
    pub objects: &'a [ObjectFile],
    /// Trampoline keys of every mutated function in `objects`
    pub trampolines: &'a [String],
    pub tests: &'a HashMap<TestId, TestDescriptor>,
    pub sandbox: &'a dyn ProcessSandbox,
    pub config: &'a EngineConfig,
    pub progress: &'a Progress,
}

/// Runs the tests of a slice of mutation points against their mutants.
///
/// The task owns a loader and a trampoline table for the lifetime of the
/// slice. At most one mutant per function is bound at any time; the
/// original body is restored once a point's tests are done.
pub struct MutantExecutionTask<'a> {
    context: &'a ExecutionContext<'a>,
    runner: TestRunner,
}

impl<'a> MutantExecutionTask<'a> {
    pub fn new(context: &'a ExecutionContext<'a>) -> Self {
        Self {
            context,
            runner: TestRunner::default(),
        }
    }

    /// Produce exactly one result per (point, reachable test) pair of `slice`
    #[instrument(skip_all, fields(worker = worker, points = slice.len()))]
    pub fn execute(&self, worker: usize, slice: &[Arc<MutationPoint>]) -> Vec<MutationResult> {
        let expected = slice.iter().map(|p| p.reachable_tests.len()).sum();
        let mut results = Vec::with_capacity(expected);

        let (mut loader, trampolines) = match self.setup() {
            Ok(state) => state,
            Err(e) => {
                error!(worker, error = %e, "failed to set up worker, marking slice invalid");
                let reason = format!("worker setup failed: {}", e);
                for point in slice {
                    push_invalid(&mut results, point, 0, &reason);
                    self.context.progress.increment();
                }
                return results;
            }
        };

        let mut halted: Option<String> = None;
        for point in slice {
            if let Some(reason) = &halted {
                push_invalid(&mut results, point, 0, reason);
            } else if let Err(e) = self.run_point(&mut loader, &trampolines, point, &mut results) {
                error!(
                    worker,
                    mutant = %point.unique_identifier(),
                    error = %e,
                    "invalid execution, halting worker"
                );
                halted = Some(format!("worker halted: {}", e));
            }
            self.context.progress.increment();
        }

        debug!(worker, results = results.len(), "slice finished");
        results
    }

    /// Fresh loader and trampolines with every trampoline on its original body
    fn setup(&self) -> Result<(JitLoader, TrampolineTable)> {
        let mut loader = self.context.runtime.loader();
        let mut trampolines = TrampolineTable::new();
        trampolines.allocate(&mut loader, self.context.trampolines)?;

        let chain = ResolverChain::new()
            .with(&RuntimeOverrides)
            .with(&HostProcessSymbols)
            .with(&trampolines);
        loader.load(self.context.objects, &chain)?;
        trampolines.bind_originals(&mut loader)?;

        Ok((loader, trampolines))
    }

    /// Run every reachable test of `point` with its mutant bound.
    ///
    /// An Invalid execution is recorded, the point's remaining tests are
    /// marked Invalid and the error is returned.
    fn run_point(
        &self,
        loader: &mut JitLoader,
        trampolines: &TrampolineTable,
        point: &Arc<MutationPoint>,
        results: &mut Vec<MutationResult>,
    ) -> Result<()> {
        let key = naming::trampoline_key(&point.function, &point.module_id);
        let mutant = point.unique_identifier();

        let bound = loader
            .address_of(&mutant)
            .ok_or_else(|| Error::NotFound(format!("mutant body '{}'", mutant)))
            .and_then(|address| trampolines.bind(loader, &key, address));
        if let Err(e) = bound {
            push_invalid(results, point, 0, &e.to_string());
            return Err(e);
        }

        let config = self.context.config;
        let mut killed = false;
        let mut outcome = Ok(());
        for (index, (test_id, distance)) in point.reachable_tests.iter().enumerate() {
            if config.fail_fast && killed {
                results.push(MutationResult {
                    point: point.clone(),
                    test: test_id.clone(),
                    distance: *distance,
                    result: ExecutionResult::fail_fast(),
                });
                continue;
            }

            let result = match self.context.tests.get(test_id) {
                Some(test) => {
                    let timeout = config.test_timeout(test.baseline_running_time);
                    loader.set_deadline(Some(timeout));
                    self.context
                        .sandbox
                        .run(&mut || self.runner.run_test(loader, test), timeout)
                }
                None => ExecutionResult::invalid(format!("unknown test '{}'", test_id)),
            };

            debug!(mutant = %mutant, test = %test_id, status = %result.status, "executed");
            let status = result.status;
            results.push(MutationResult {
                point: point.clone(),
                test: test_id.clone(),
                distance: *distance,
                result,
            });

            if status == ExecutionStatus::Invalid {
                push_invalid(results, point, index + 1, "previous execution was invalid");
                outcome = Err(Error::InvalidState(format!(
                    "invalid execution of {} against {}",
                    test_id, mutant
                )));
                break;
            }
            killed |= status.kills_mutant();
        }

        let original = naming::original_symbol(&key);
        let restored = loader
            .address_of(&original)
            .ok_or_else(|| Error::NotFound(original.clone()))
            .and_then(|address| trampolines.bind(loader, &key, address));
        outcome.and(restored)
    }
}

/// Record Invalid for the tests of `point` starting at `from`
fn push_invalid(results: &mut Vec<MutationResult>, point: &Arc<MutationPoint>, from: usize, reason: &str) {
    for (test, distance) in point.reachable_tests.iter().skip(from) {
        results.push(MutationResult {
            point: point.clone(),
            test: test.clone(),
            distance: *distance,
            result: ExecutionResult::invalid(reason),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, Fixture};
    use mutjit_runtime::NullProcessSandbox;
    use std::time::Duration;

    fn context<'a>(
        fixture: &'a Fixture,
        config: &'a EngineConfig,
        progress: &'a Progress,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            runtime: &fixture.runtime,
            objects: &fixture.objects,
            trampolines: &fixture.trampolines,
            tests: &fixture.tests,
            sandbox: &NullProcessSandbox,
            config,
            progress,
        }
    }

    fn statuses(results: &[MutationResult]) -> Vec<(String, ExecutionStatus)> {
        results
            .iter()
            .map(|r| (format!("{}/{}", r.point.function, r.test), r.result.status))
            .collect()
    }

    #[test]
    fn test_execute_slice() {
        let fixture = fixture();
        let config = EngineConfig::default();
        let progress = Progress::new(fixture.points.len());
        let context = context(&fixture, &config, &progress);

        let results = MutantExecutionTask::new(&context).execute(0, &fixture.points);
        assert_eq!(
            statuses(&results),
            vec![
                ("sum/test_sum".to_string(), ExecutionStatus::Failed),
                ("sum/test_sum_zero".to_string(), ExecutionStatus::Passed),
                ("max/test_max".to_string(), ExecutionStatus::Failed),
                ("max/test_max".to_string(), ExecutionStatus::Passed),
            ]
        );
        assert_eq!(progress.completed(), 3);
    }

    #[test]
    fn test_fail_fast_short_circuits() {
        let fixture = fixture();
        let config = EngineConfig {
            fail_fast: true,
            ..Default::default()
        };
        let progress = Progress::new(fixture.points.len());
        let context = context(&fixture, &config, &progress);

        let results = MutantExecutionTask::new(&context).execute(0, &fixture.points[..1]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result.status, ExecutionStatus::Failed);
        assert_eq!(results[1].result.status, ExecutionStatus::FailFast);
        assert_eq!(results[1].result.running_time, Duration::ZERO);
    }

    #[test]
    fn test_original_restored_after_point() {
        let fixture = fixture();
        let config = EngineConfig::default();
        let progress = Progress::new(1);
        let context = context(&fixture, &config, &progress);
        let task = MutantExecutionTask::new(&context);

        let (mut loader, trampolines) = task.setup().unwrap();
        let point = &fixture.points[0];
        let key = naming::trampoline_key(&point.function, &point.module_id);
        let original = loader.address_of(&naming::original_symbol(&key)).unwrap();
        assert_eq!(trampolines.value(&mut loader, &key).unwrap(), original);

        let mut results = Vec::new();
        task.run_point(&mut loader, &trampolines, point, &mut results).unwrap();
        assert_eq!(trampolines.value(&mut loader, &key).unwrap(), original);

        // the unmutated baseline still passes through the trampoline
        let test = &fixture.tests[&TestId::new("test_sum")];
        let outcome = TestRunner::default().run_test(&mut loader, test);
        assert_eq!(outcome.status, ExecutionStatus::Passed);
    }

    #[test]
    fn test_setup_failure_marks_slice_invalid() {
        let fixture = fixture();
        let config = EngineConfig::default();
        let progress = Progress::new(fixture.points.len());
        // the tests module alone cannot link
        let tests_only = &fixture.objects[1..];
        let context = ExecutionContext {
            objects: tests_only,
            ..context(&fixture, &config, &progress)
        };

        let results = MutantExecutionTask::new(&context).execute(0, &fixture.points);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.result.status == ExecutionStatus::Invalid));
        assert!(results[0].result.output.contains("setup failed"));
        assert_eq!(progress.completed(), 3);
    }

    #[test]
    fn test_invalid_execution_halts_worker() {
        let mut fixture = fixture();
        fixture
            .tests
            .insert(TestId::new("test_sum"), TestDescriptor::new("test_sum", "no_such_entry"));
        let config = EngineConfig::default();
        let progress = Progress::new(fixture.points.len());
        let context = context(&fixture, &config, &progress);

        let results = MutantExecutionTask::new(&context).execute(0, &fixture.points);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.result.status == ExecutionStatus::Invalid));
        assert!(results[3].result.output.contains("worker halted"));
    }
}
