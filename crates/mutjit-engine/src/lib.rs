//! Mutation testing engine.
//!
//! This crate turns program units and tests into a scored run:
//! - a baseline run that traces which functions each test reaches
//! - mutation point discovery and preparation of the mutated object set
//! - per-worker execution tasks scheduled across a thread pool
//! - the flat result report and its summary

pub mod driver;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod task;

#[cfg(test)]
mod testing;

pub use driver::{BaselineTest, Driver};
pub use progress::Progress;
pub use report::{ResultRecord, RunReport};
pub use scheduler::{partition, Scheduler};
pub use task::{ExecutionContext, MutantExecutionTask, MutationResult};
