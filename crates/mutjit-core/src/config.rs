//! Configuration types for a mutation testing run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower bound for every per-test timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_FLOOR_MS: u64 = 30_000;

/// Per-test timeout is this many times the test's baseline running time.
pub const DEFAULT_TIMEOUT_MULTIPLIER: u32 = 10;

/// Reachable functions deeper than this are not mutated.
pub const DEFAULT_MAX_DISTANCE: u32 = 128;

/// Isolation strategy used to run a test against a mutant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Run each test in a forked child process
    Fork,
    /// Run each test in the worker itself (no isolation, no preemption)
    None,
}

impl Default for SandboxKind {
    fn default() -> Self {
        if cfg!(unix) {
            SandboxKind::Fork
        } else {
            SandboxKind::None
        }
    }
}

/// Limits applied to JIT-compiled program images
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum native stack used by JIT code (bytes)
    pub max_wasm_stack: usize,
    /// Initial size of an image's linear memory (64 KiB pages)
    pub memory_pages: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_wasm_stack: 512 * 1024,
            memory_pages: 16, // 1 MiB
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads, each owning its own JIT image
    pub workers: usize,
    /// Stop running tests against a mutant once one test detected it
    pub fail_fast: bool,
    /// Lower bound for per-test timeouts (milliseconds)
    pub timeout_floor_ms: u64,
    /// Per-test timeout as a multiple of the baseline running time
    pub timeout_multiplier: u32,
    /// Maximum reachability distance of mutated functions
    pub max_distance: u32,
    /// Trace a dynamic call tree during the baseline run to prune mutants
    pub call_tree: bool,
    /// Isolation strategy for test executions
    pub sandbox: SandboxKind,
    /// JIT image limits
    pub execution: ExecutionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            fail_fast: false,
            timeout_floor_ms: DEFAULT_TIMEOUT_FLOOR_MS,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            max_distance: DEFAULT_MAX_DISTANCE,
            call_tree: true,
            sandbox: SandboxKind::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp values that would make a run impossible
    pub fn normalize(&mut self) {
        if self.workers == 0 {
            tracing::debug!("workers = 0 requested, using a single worker");
            self.workers = 1;
        }
        if self.timeout_multiplier == 0 {
            self.timeout_multiplier = 1;
        }
    }

    pub fn timeout_floor(&self) -> Duration {
        Duration::from_millis(self.timeout_floor_ms)
    }

    /// Timeout for one test execution: `max(floor, multiplier * baseline)`
    pub fn test_timeout(&self, baseline: Duration) -> Duration {
        let scaled = baseline.saturating_mul(self.timeout_multiplier);
        scaled.max(self.timeout_floor())
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        let mut config: EngineConfig = serde_json::from_str(json)?;
        config.normalize();
        Ok(config)
    }
}
