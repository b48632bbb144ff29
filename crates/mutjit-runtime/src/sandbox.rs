//! Isolation boundaries for running test bodies.
//!
//! A sandbox turns a test body into a timed [`ExecutionResult`]. The fork
//! sandbox runs the body in a copy of the calling process and enforces the
//! timeout by killing the copy; the null sandbox runs it in place.

use mutjit_core::{ExecutionResult, ExecutionStatus, TestOutcome};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Runs a test body behind an isolation boundary
pub trait ProcessSandbox: Send + Sync {
    fn run(&self, body: &mut dyn FnMut() -> TestOutcome, timeout: Duration) -> ExecutionResult;
}

fn run_guarded(body: &mut dyn FnMut() -> TestOutcome) -> TestOutcome {
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|_| TestOutcome::new(ExecutionStatus::Crashed, "test body panicked"))
}

/// Runs the body on the calling thread.
///
/// There is no isolation and the sandbox does not enforce the timeout
/// itself: a body only stops early if it runs JIT code under a deadline
/// armed on its loader. Panics are reported as Crashed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProcessSandbox;

impl ProcessSandbox for NullProcessSandbox {
    fn run(&self, body: &mut dyn FnMut() -> TestOutcome, _timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        let outcome = run_guarded(body);
        ExecutionResult::new(outcome.status, start.elapsed(), outcome.output)
    }
}

#[cfg(unix)]
pub use fork::ForkProcessSandbox;

#[cfg(unix)]
mod fork {
    use super::*;
    use mutjit_core::{Error, Result};
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::{fork, pipe, ForkResult, Pid};
    use std::fs::File;
    use std::io::{Read, Write};

    const POLL_INTERVAL: Duration = Duration::from_millis(2);

    /// Leading byte of the child's report for an ordinary run
    const RUN_TAG: u8 = b'R';
    /// Leading byte of the child's report when the body returned Invalid
    const INVALID_TAG: u8 = b'I';

    /// Runs the body in a forked child process.
    ///
    /// The child inherits the parent's heap, so a loaded image is usable
    /// there without reloading. The child reports through its exit status:
    /// 0 for Passed, 1 for Failed, SIGABRT for Crashed. Program output and
    /// an Invalid marker travel back through a pipe. The child never logs.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ForkProcessSandbox;

    impl ProcessSandbox for ForkProcessSandbox {
        fn run(&self, body: &mut dyn FnMut() -> TestOutcome, timeout: Duration) -> ExecutionResult {
            match fork_and_wait(body, timeout) {
                Ok((status, running_time, output)) => {
                    ExecutionResult::new(status, running_time, output)
                }
                Err(e) => ExecutionResult::invalid(e.to_string()),
            }
        }
    }

    /// Run `body` in a child and return its status, running time and output.
    ///
    /// The running time ends when the child is reaped, not when its output
    /// reaches end of file: other processes may still hold the pipe open.
    fn fork_and_wait(
        body: &mut dyn FnMut() -> TestOutcome,
        timeout: Duration,
    ) -> Result<(ExecutionStatus, Duration, String)> {
        let start = Instant::now();
        let (read_end, write_end) =
            pipe().map_err(|e| Error::Sandbox(format!("pipe failed: {}", e)))?;

        // SAFETY: the child only runs the body, writes its report and exits
        // without returning into the caller's frames.
        match unsafe { fork() }.map_err(|e| Error::Sandbox(format!("fork failed: {}", e)))? {
            ForkResult::Child => {
                drop(read_end);
                let outcome = run_guarded(body);

                let mut report = File::from(write_end);
                let tag = if outcome.status == ExecutionStatus::Invalid {
                    INVALID_TAG
                } else {
                    RUN_TAG
                };
                let _ = report.write_all(&[tag]);
                let _ = report.write_all(outcome.output.as_bytes());
                drop(report);

                match outcome.status {
                    ExecutionStatus::Passed => unsafe { nix::libc::_exit(0) },
                    ExecutionStatus::Crashed => std::process::abort(),
                    _ => unsafe { nix::libc::_exit(1) },
                }
            }
            ForkResult::Parent { child } => {
                drop(write_end);
                let reader = std::thread::spawn(move || {
                    let mut bytes = Vec::new();
                    let _ = File::from(read_end).read_to_end(&mut bytes);
                    bytes
                });

                let waited = wait_with_timeout(child, timeout);
                let running_time = start.elapsed();
                let bytes = reader.join().unwrap_or_default();
                let (status, timed_out) = waited?;

                let (tag, output) = match bytes.split_first() {
                    Some((tag, rest)) => (Some(*tag), String::from_utf8_lossy(rest).into_owned()),
                    None => (None, String::new()),
                };
                Ok((classify(status, timed_out, tag), running_time, output))
            }
        }
    }

    fn classify(status: WaitStatus, timed_out: bool, tag: Option<u8>) -> ExecutionStatus {
        if timed_out {
            return ExecutionStatus::Timeout;
        }
        match status {
            WaitStatus::Exited(_, _) if tag == Some(INVALID_TAG) => ExecutionStatus::Invalid,
            WaitStatus::Exited(_, 0) => ExecutionStatus::Passed,
            WaitStatus::Exited(_, _) => ExecutionStatus::Failed,
            WaitStatus::Signaled(_, _, _) => ExecutionStatus::Crashed,
            _ => ExecutionStatus::Invalid,
        }
    }

    /// Poll the child until it exits or `timeout` elapses; always reaps it
    fn wait_with_timeout(child: Pid, timeout: Duration) -> Result<(WaitStatus, bool)> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => return Ok((status, false)),
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    let _ = kill(child, Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    return Err(Error::Sandbox(format!("waitpid failed: {}", e)));
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = kill(child, Signal::SIGKILL);
                let status = loop {
                    match waitpid(child, None) {
                        Err(Errno::EINTR) => continue,
                        other => break other,
                    }
                }
                .map_err(|e| Error::Sandbox(format!("waitpid after kill failed: {}", e)))?;
                return Ok((status, true));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

}
