//! End-to-end mutation testing run.

use crate::progress::Progress;
use crate::report::RunReport;
use crate::scheduler::Scheduler;
use crate::task::ExecutionContext;
use chrono::Utc;
use mutjit_core::{
    Distance, EngineConfig, Error, ExecutionStatus, Result, RunId, SandboxKind, TestDescriptor,
    TestId,
};
use mutjit_ir::{
    naming, validate_program, ModuleRole, MutationOperator, MutationPoint, MutationsFinder,
    ProgramUnit,
};
use mutjit_runtime::{
    CallTreeTracer, EpochTicker, HostProcessSymbols, InstrumentationInfo, NullProcessSandbox, ProcessSandbox,
    ResolverChain, Runtime, RuntimeOverrides, TestRunner,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A test that passed on the original program, with the functions it reached
#[derive(Debug, Clone)]
pub struct BaselineTest {
    pub test: TestDescriptor,
    /// `(unit index, function index, distance)` of every reached source function
    pub testees: Vec<(usize, usize, Distance)>,
}

/// Drives a whole run: baseline, discovery, preparation and execution
pub struct Driver {
    config: EngineConfig,
    runtime: Runtime,
    operators: Vec<MutationOperator>,
}

impl Driver {
    pub fn new(mut config: EngineConfig) -> Result<Self> {
        config.normalize();
        let runtime = Runtime::new(config.execution.clone())?;
        Ok(Self {
            config,
            runtime,
            operators: MutationOperator::all(),
        })
    }

    pub fn with_operators(mut self, operators: Vec<MutationOperator>) -> Self {
        self.operators = operators;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mutate `units` and run `tests` against every mutant they reach
    #[instrument(skip_all, fields(modules = units.len(), tests = tests.len()))]
    pub fn run(&self, mut units: Vec<ProgramUnit>, tests: Vec<TestDescriptor>) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(%run_id, workers = self.config.workers, "starting mutation testing run");

        let mut seen = HashSet::new();
        for test in &tests {
            if !seen.insert(test.id()) {
                return Err(Error::Validation(format!("duplicate test '{}'", test.name)));
            }
        }
        for unit in &units {
            validate_program(unit.program())
                .map_err(|e| Error::Validation(format!("{}: {}", unit.path(), e)))?;
        }

        let baseline = self.baseline(&units, &tests)?;
        info!(passing = baseline.len(), "baseline finished");

        let mut finder = MutationsFinder::new(self.operators.clone());
        for entry in &baseline {
            let id = entry.test.id();
            for &(unit, function, distance) in &entry.testees {
                finder.record(&units[unit], function, &id, distance);
            }
        }
        let points = finder.into_points();
        info!(points = points.len(), "found mutation points");

        let refs: Vec<&MutationPoint> = points.iter().collect();
        let mut trampolines = Vec::new();
        for unit in units.iter_mut().filter(|u| u.role() == ModuleRole::Source) {
            trampolines.extend(unit.prepare_mutations(&refs)?);
        }

        let objects = units
            .iter()
            .map(|u| self.runtime.compile(u.program(), u.identifier(), false))
            .collect::<Result<Vec<_>>>()?;
        debug!(objects = objects.len(), trampolines = trampolines.len(), "compiled mutated objects");

        let points: Vec<Arc<MutationPoint>> = points.into_iter().map(Arc::new).collect();
        let tests: HashMap<TestId, TestDescriptor> = baseline
            .into_iter()
            .map(|b| (b.test.id(), b.test))
            .collect();
        let progress = Progress::new(points.len());
        let sandbox = sandbox_for(self.config.sandbox);
        let context = ExecutionContext {
            runtime: &self.runtime,
            objects: &objects,
            trampolines: &trampolines,
            tests: &tests,
            sandbox: sandbox.as_ref(),
            config: &self.config,
            progress: &progress,
        };

        let ticker = EpochTicker::start(self.runtime.engine())?;
        let results = Scheduler::new(self.config.workers).run(&context, &points);
        drop(ticker);
        let report = RunReport::new(run_id, started_at, &results);
        info!(
            completed = progress.completed(),
            mutants = report.summary.mutants,
            killed = report.summary.killed,
            survived = report.summary.survived,
            invalid = report.summary.invalid,
            "run finished"
        );
        Ok(report)
    }

    /// Run every test against the original program, tracing call trees when
    /// enabled. Each test is bounded by the timeout floor; tests that do not
    /// pass (including those that time out) are excluded.
    #[instrument(skip_all)]
    pub fn baseline(&self, units: &[ProgramUnit], tests: &[TestDescriptor]) -> Result<Vec<BaselineTest>> {
        let instrument = self.config.call_tree;
        let objects = units
            .iter()
            .map(|u| self.runtime.compile(u.program(), u.identifier(), instrument))
            .collect::<Result<Vec<_>>>()?;

        let tracer = CallTreeTracer::new(InstrumentationInfo::new(&objects));
        let chain = ResolverChain::new()
            .with(&RuntimeOverrides)
            .with(&HostProcessSymbols)
            .with(tracer.info());
        let mut loader = self.runtime.loader();
        loader.load(&objects, &chain)?;

        let module_index: HashMap<&str, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.identifier(), i))
            .collect();
        let runner = TestRunner::default();
        let timeout = self.config.test_timeout(Duration::ZERO);
        let mut passing = Vec::new();
        let _ticker = EpochTicker::start(self.runtime.engine())?;

        for test in tests {
            loader.set_deadline(Some(timeout));
            let trace = tracer.trace(&mut loader, &runner, test)?;
            if trace.outcome.status != ExecutionStatus::Passed {
                warn!(
                    test = %test.name,
                    status = %trace.outcome.status,
                    "excluding test that does not pass on the original program"
                );
                continue;
            }

            let testees = if instrument {
                trace
                    .testees(tracer.info(), &test.entry, self.config.max_distance)
                    .into_iter()
                    .filter_map(|(function, distance)| {
                        let unit = *module_index.get(function.module_id.as_str())?;
                        Some((unit, function.local_index, distance))
                    })
                    .collect()
            } else {
                all_functions(units)
            };
            let testees: Vec<_> = testees
                .into_iter()
                .filter(|&(unit, function, _)| is_mutable(&units[unit], function))
                .collect();

            debug!(test = %test.name, testees = testees.len(), "baseline passed");
            let mut test = test.clone();
            test.baseline_running_time = trace.running_time;
            passing.push(BaselineTest { test, testees });
        }
        Ok(passing)
    }
}

/// Every function of every unit at distance 0
fn all_functions(units: &[ProgramUnit]) -> Vec<(usize, usize, Distance)> {
    units
        .iter()
        .enumerate()
        .flat_map(|(u, unit)| (0..unit.program().num_functions()).map(move |f| (u, f, 0)))
        .collect()
}

fn is_mutable(unit: &ProgramUnit, function: usize) -> bool {
    unit.role() == ModuleRole::Source
        && unit
            .program()
            .get_function(function)
            .is_some_and(|f| !naming::is_internal(&f.name))
}

#[cfg(unix)]
fn sandbox_for(kind: SandboxKind) -> Box<dyn ProcessSandbox> {
    match kind {
        SandboxKind::Fork => Box::new(mutjit_runtime::ForkProcessSandbox),
        SandboxKind::None => Box::new(NullProcessSandbox),
    }
}

#[cfg(not(unix))]
fn sandbox_for(kind: SandboxKind) -> Box<dyn ProcessSandbox> {
    if kind == SandboxKind::Fork {
        warn!("fork sandbox is unavailable on this platform, running tests in process");
    }
    Box::new(NullProcessSandbox)
}
