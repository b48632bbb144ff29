//! Host functions that JIT code may link against.

use crate::context::{Destructor, ImageState};
use mutjit_ir::{ReturnType, Signature};
use std::fmt;
use wasmtime::*;

/// Raised by the emulated `exit` to unwind JIT code with an exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramExit {
    pub code: i32,
}

impl fmt::Display for ProgramExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program exited with status {}", self.code)
    }
}

impl std::error::Error for ProgramExit {}

/// Every host-implemented symbol the resolvers can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeSymbol {
    /// `exit(code)` unwinding the JIT code instead of the process
    EmulatedExit,
    /// `atexit(fn)` registering with the image
    EmulatedAtExit,
    /// `__cxa_atexit(fn, arg, dso)` registering with the image
    EmulatedCxaAtExit,
    /// The host process's own `exit`
    ProcessExit,
    /// The host process's own `atexit`, which cannot call into JIT code
    ProcessAtExit,
    Abort,
    PutChar,
    PrintI32,
    EnterFunction,
    LeaveFunction,
}

impl NativeSymbol {
    pub fn signature(&self) -> Signature {
        match self {
            NativeSymbol::EmulatedExit | NativeSymbol::ProcessExit => {
                Signature::new(1, ReturnType::Void)
            }
            NativeSymbol::EmulatedAtExit | NativeSymbol::ProcessAtExit => {
                Signature::new(1, ReturnType::Int)
            }
            NativeSymbol::EmulatedCxaAtExit => Signature::new(3, ReturnType::Int),
            NativeSymbol::Abort => Signature::new(0, ReturnType::Void),
            NativeSymbol::PutChar => Signature::new(1, ReturnType::Int),
            NativeSymbol::PrintI32
            | NativeSymbol::EnterFunction
            | NativeSymbol::LeaveFunction => Signature::new(1, ReturnType::Void),
        }
    }

    /// Create the host function inside `store`
    pub fn create(&self, mut store: impl AsContextMut<Data = ImageState>) -> Func {
        match self {
            NativeSymbol::EmulatedExit => Func::wrap(&mut store, |code: i32| -> anyhow::Result<()> {
                Err(anyhow::Error::new(ProgramExit { code }))
            }),
            NativeSymbol::EmulatedAtExit => Func::wrap(
                &mut store,
                |mut caller: Caller<'_, ImageState>, function: i32| -> i32 {
                    caller.data_mut().destructors.push(Destructor {
                        function: function as u32 as u64,
                        argument: None,
                    });
                    0
                },
            ),
            NativeSymbol::EmulatedCxaAtExit => Func::wrap(
                &mut store,
                |mut caller: Caller<'_, ImageState>, function: i32, argument: i32, _dso: i32| -> i32 {
                    caller.data_mut().destructors.push(Destructor {
                        function: function as u32 as u64,
                        argument: Some(argument),
                    });
                    0
                },
            ),
            NativeSymbol::ProcessExit => Func::wrap(&mut store, |code: i32| -> () {
                std::process::exit(code)
            }),
            NativeSymbol::ProcessAtExit => Func::wrap(&mut store, |_function: i32| -> anyhow::Result<i32> {
                Err(anyhow::anyhow!(
                    "atexit: the host process cannot run JIT-compiled destructors"
                ))
            }),
            NativeSymbol::Abort => Func::wrap(&mut store, || -> anyhow::Result<()> {
                Err(anyhow::anyhow!("abort() called"))
            }),
            NativeSymbol::PutChar => Func::wrap(
                &mut store,
                |mut caller: Caller<'_, ImageState>, c: i32| -> i32 {
                    caller.data_mut().output.push(c as u8);
                    c
                },
            ),
            NativeSymbol::PrintI32 => Func::wrap(
                &mut store,
                |mut caller: Caller<'_, ImageState>, value: i32| {
                    caller
                        .data_mut()
                        .output
                        .extend_from_slice(value.to_string().as_bytes());
                },
            ),
            NativeSymbol::EnterFunction => Func::wrap(
                &mut store,
                |mut caller: Caller<'_, ImageState>, index: i32| {
                    caller.data_mut().enter_function(index as u32 as u64);
                },
            ),
            NativeSymbol::LeaveFunction => Func::wrap(
                &mut store,
                |mut caller: Caller<'_, ImageState>, index: i32| {
                    caller.data_mut().leave_function(index as u32 as u64);
                },
            ),
        }
    }
}
