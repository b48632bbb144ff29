//! Core type definitions shared by the compiler, the runtime and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Number of call hops between a test entry and a reached function
pub type Distance = u32;

/// Unique identifier for a mutation testing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a test: its name, unique within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId(pub String);

impl TestId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source position attached to IR instructions for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Terminal status of one test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Crashed,
    Timeout,
    /// Not executed: an earlier test already detected the mutant
    FailFast,
    /// The execution path should have been unreachable
    Invalid,
}

impl ExecutionStatus {
    /// Whether this status means the mutant was detected
    pub fn kills_mutant(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed
                | ExecutionStatus::Crashed
                | ExecutionStatus::Timeout
                | ExecutionStatus::FailFast
        )
    }

    /// Whether the test body actually ran
    pub fn was_executed(&self) -> bool {
        !matches!(self, ExecutionStatus::FailFast | ExecutionStatus::Invalid)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Passed => "Passed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Crashed => "Crashed",
            ExecutionStatus::Timeout => "Timeout",
            ExecutionStatus::FailFast => "FailFast",
            ExecutionStatus::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// What a test body reports back to the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub status: ExecutionStatus,
    /// Program output written through the image's output symbols
    pub output: String,
}

impl TestOutcome {
    pub fn new(status: ExecutionStatus, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }
}

/// Result of running one test under a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub running_time: Duration,
    /// Captured program output and sandbox diagnostics
    pub output: String,
}

impl ExecutionResult {
    pub fn new(status: ExecutionStatus, running_time: Duration, output: impl Into<String>) -> Self {
        Self {
            status,
            running_time,
            output: output.into(),
        }
    }

    /// Synthesized result for a test skipped by fail-fast
    pub fn fail_fast() -> Self {
        Self::new(ExecutionStatus::FailFast, Duration::ZERO, String::new())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(ExecutionStatus::Invalid, Duration::ZERO, reason)
    }
}

/// A test of the program under mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    pub name: String,
    /// Symbol of the test entry point in the loaded image
    pub entry: String,
    #[serde(default)]
    pub program_arguments: Vec<String>,
    /// Measured during the baseline run
    #[serde(default)]
    pub baseline_running_time: Duration,
}

impl TestDescriptor {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            program_arguments: Vec::new(),
            baseline_running_time: Duration::ZERO,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.program_arguments = arguments;
        self
    }

    pub fn id(&self) -> TestId {
        TestId::new(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kills_mutant() {
        assert!(!ExecutionStatus::Passed.kills_mutant());
        assert!(ExecutionStatus::Failed.kills_mutant());
        assert!(ExecutionStatus::Timeout.kills_mutant());
        assert!(ExecutionStatus::FailFast.kills_mutant());
        assert!(!ExecutionStatus::Invalid.kills_mutant());
    }

    #[test]
    fn test_fail_fast_result_is_free() {
        let result = ExecutionResult::fail_fast();
        assert_eq!(result.status, ExecutionStatus::FailFast);
        assert_eq!(result.running_time, Duration::ZERO);
        assert!(!result.status.was_executed());
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let test: TestDescriptor =
            serde_json::from_str(r#"{ "name": "sum_test", "entry": "test_sum" }"#).unwrap();
        assert_eq!(test.id(), TestId::new("sum_test"));
        assert!(test.program_arguments.is_empty());
        assert_eq!(test.baseline_running_time, Duration::ZERO);
    }

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation::new("sum.c", 12, 5);
        assert_eq!(loc.to_string(), "sum.c:12:5");
    }
}
