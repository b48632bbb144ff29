//! Wall-clock limits for JIT code running in process.
//!
//! Compiled code checks the engine's epoch at function entries and loop
//! headers. An [`EpochTicker`] advances the epoch every [`EPOCH_TICK`], so
//! a store deadline of `n` ticks stops a call after roughly `n` ticks.

use mutjit_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wasmtime::Engine;

pub const EPOCH_TICK: Duration = Duration::from_millis(5);

/// Ticks covering `timeout`, at least one
pub fn ticks_for(timeout: Duration) -> u64 {
    let ticks = timeout.as_nanos().div_ceil(EPOCH_TICK.as_nanos());
    u64::try_from(ticks).unwrap_or(u64::MAX / 4).max(1)
}

/// Advances an engine's epoch on a background thread until dropped.
///
/// A forked child does not inherit the thread, so deadlines never fire
/// inside a sandbox child; the sandbox enforces its own timeout there.
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    pub fn start(engine: &Engine) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let engine = engine.clone();
        let handle = thread::Builder::new()
            .name("mutjit-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_for_rounds_up() {
        assert_eq!(ticks_for(Duration::ZERO), 1);
        assert_eq!(ticks_for(EPOCH_TICK), 1);
        assert_eq!(ticks_for(EPOCH_TICK + Duration::from_nanos(1)), 2);
        assert_eq!(ticks_for(Duration::from_secs(1)), 200);
    }

    #[test]
    fn test_ticker_stops_on_drop() {
        let engine = Engine::default();
        let ticker = EpochTicker::start(&engine).unwrap();
        thread::sleep(EPOCH_TICK * 4);
        drop(ticker);
    }
}
