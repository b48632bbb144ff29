//! Running one test entry point inside a loaded image.
//!
//! The runner may execute inside a forked sandbox child, so it never logs.

use crate::loader::JitLoader;
use crate::natives::ProgramExit;
use mutjit_core::{Error, ExecutionStatus, Result, TestDescriptor, TestOutcome};
use wasmtime::*;

/// Start of the region of linear memory holding `argv`
pub const ARGUMENT_AREA_OFFSET: usize = 0x1000;
/// Size of the `argv` region: pointer array followed by the strings
pub const ARGUMENT_AREA_SIZE: usize = 0x1000;

const DEFAULT_PROGRAM_NAME: &str = "mutjit";

/// Executes tests against whatever image a loader currently holds
#[derive(Debug, Clone)]
pub struct TestRunner {
    program_name: String,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM_NAME)
    }
}

impl TestRunner {
    /// `program_name` is passed to the entry as `argv[0]`
    pub fn new(program_name: &str) -> Self {
        Self {
            program_name: program_name.to_string(),
        }
    }

    /// Run static constructors, the test entry and registered destructors.
    ///
    /// Exit status 0 (or a void entry returning) is Passed, any other status
    /// is Failed, running past the loader's deadline is Timeout, any other
    /// trap is Crashed. A missing or ill-typed entry is Invalid.
    pub fn run_test(&self, loader: &mut JitLoader, test: &TestDescriptor) -> TestOutcome {
        let status = match self.execute(loader, test) {
            Ok(status) => status,
            Err(e) => return TestOutcome::new(ExecutionStatus::Invalid, e.to_string()),
        };
        let output = loader.store_mut().data_mut().take_output();
        TestOutcome::new(status, output)
    }

    fn execute(&self, loader: &mut JitLoader, test: &TestDescriptor) -> Result<ExecutionStatus> {
        if !loader.is_loaded() {
            return Err(Error::InvalidState("no image loaded".to_string()));
        }
        loader.store_mut().data_mut().reset_run();

        let entry = loader
            .function(&test.entry)
            .ok_or_else(|| Error::NotFound(format!("test entry '{}'", test.entry)))?;
        let ty = entry.ty(loader.store());
        if ty.results().len() > 1 {
            return Err(Error::InvalidState(format!(
                "test entry '{}' returns {} values",
                test.entry,
                ty.results().len()
            )));
        }
        let params = match ty.params().len() {
            0 => Vec::new(),
            2 => {
                let (argc, argv) = self.write_arguments(loader, test)?;
                vec![Val::I32(argc), Val::I32(argv)]
            }
            n => {
                return Err(Error::InvalidState(format!(
                    "test entry '{}' takes {} parameters",
                    test.entry, n
                )))
            }
        };

        for address in loader.constructors() {
            if let Err(e) = call_address(loader, address, None) {
                return Ok(self.finish_after(loader, classify(&e)));
            }
        }

        let mut results = vec![Val::I32(0); ty.results().len()];
        let status = match entry.call(loader.store_mut(), &params, &mut results) {
            Ok(()) => match results.first().and_then(Val::i32) {
                None | Some(0) => ExecutionStatus::Passed,
                Some(_) => ExecutionStatus::Failed,
            },
            Err(e) => classify(&e),
        };

        Ok(self.finish_after(loader, status))
    }

    /// Run destructors unless the program already crashed or timed out
    fn finish_after(&self, loader: &mut JitLoader, status: ExecutionStatus) -> ExecutionStatus {
        if matches!(status, ExecutionStatus::Crashed | ExecutionStatus::Timeout) {
            return status;
        }
        let destructors = std::mem::take(&mut loader.store_mut().data_mut().destructors);
        for destructor in destructors.into_iter().rev() {
            if let Err(e) = call_address(loader, destructor.function, destructor.argument) {
                return classify(&e);
            }
        }
        status
    }

    /// Lay out `argv` in linear memory and return `(argc, argv)`
    fn write_arguments(&self, loader: &mut JitLoader, test: &TestDescriptor) -> Result<(i32, i32)> {
        let memory = loader
            .memory()
            .ok_or_else(|| Error::InvalidState("image has no memory".to_string()))?;

        let args: Vec<&str> = std::iter::once(self.program_name.as_str())
            .chain(test.program_arguments.iter().map(String::as_str))
            .collect();
        let table_size = (args.len() + 1) * 4;
        let strings_size: usize = args.iter().map(|a| a.len() + 1).sum();
        if table_size + strings_size > ARGUMENT_AREA_SIZE {
            return Err(Error::InvalidState(format!(
                "arguments of '{}' exceed {} bytes",
                test.name, ARGUMENT_AREA_SIZE
            )));
        }

        let mut area = vec![0u8; table_size + strings_size];
        let mut next = table_size;
        for (i, arg) in args.iter().enumerate() {
            let pointer = (ARGUMENT_AREA_OFFSET + next) as u32;
            area[i * 4..i * 4 + 4].copy_from_slice(&pointer.to_le_bytes());
            area[next..next + arg.len()].copy_from_slice(arg.as_bytes());
            next += arg.len() + 1;
        }

        memory
            .write(loader.store_mut(), ARGUMENT_AREA_OFFSET, &area)
            .map_err(|e| Error::Wasm(format!("Failed to write arguments: {}", e)))?;
        Ok((args.len() as i32, ARGUMENT_AREA_OFFSET as i32))
    }
}

fn call_address(loader: &mut JitLoader, address: u64, argument: Option<i32>) -> anyhow::Result<()> {
    let func = loader
        .function_at(address)
        .ok_or_else(|| anyhow::anyhow!("no function at address {}", address))?;
    let results = func.ty(loader.store()).results().len();
    let params: Vec<Val> = argument.map(Val::I32).into_iter().collect();
    let mut out = vec![Val::I32(0); results];
    func.call(loader.store_mut(), &params, &mut out)
}

fn classify(error: &anyhow::Error) -> ExecutionStatus {
    match error.downcast_ref::<ProgramExit>() {
        Some(ProgramExit { code: 0 }) => ExecutionStatus::Passed,
        Some(_) => ExecutionStatus::Failed,
        None if matches!(error.downcast_ref::<Trap>(), Some(Trap::Interrupt)) => {
            ExecutionStatus::Timeout
        }
        None => ExecutionStatus::Crashed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{HostProcessSymbols, ResolverChain, RuntimeOverrides};
    use crate::testing::{spin_program, sum_program, sum_test_program};
    use crate::{EpochTicker, Runtime};
    use mutjit_core::ExecutionConfig;
    use std::time::{Duration, Instant};
    use mutjit_ir::{ExternalDeclaration, Function, Instruction, Opcode, Program, Register, ReturnType, Value};

    fn load(runtime: &Runtime, programs: &[(&Program, &str)]) -> JitLoader {
        let objects: Vec<_> = programs
            .iter()
            .map(|(p, id)| runtime.compile(p, id, false).unwrap())
            .collect();
        let chain = ResolverChain::new()
            .with(&RuntimeOverrides)
            .with(&HostProcessSymbols);
        let mut loader = runtime.loader();
        loader.load(&objects, &chain).unwrap();
        loader
    }

    fn exit_program(code: i32) -> Program {
        let mut program = Program::new();
        program.declare(ExternalDeclaration::new("exit", 1, ReturnType::Void));
        let mut main = Function::new("main".to_string(), 0, ReturnType::Int);
        main.blocks[0].add_instruction(Instruction::load_const(Register(0), Value::Int(code)));
        main.blocks[0].add_instruction(Instruction::call("exit", &[Register(0)], None));
        main.blocks[0].add_instruction(Instruction::load_const(Register(1), Value::Int(0)));
        main.blocks[0].add_instruction(Instruction::return_value(Register(1)));
        program.add_function(main);
        program
    }

    #[test]
    fn test_passing_test() {
        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&sum_program(), "sum"), (&sum_test_program(), "t")]);

        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("sum", "test_sum"));
        assert_eq!(outcome.status, ExecutionStatus::Passed);
    }

    #[test]
    fn test_failing_test() {
        let mut broken = sum_program();
        broken.functions[0].blocks[0].instructions[0].opcode = Opcode::Sub;

        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&broken, "sum"), (&sum_test_program(), "t")]);

        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("sum", "test_sum"));
        assert_eq!(outcome.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_exit_status_is_test_status() {
        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let test = TestDescriptor::new("exit", "main");

        let mut loader = load(&runtime, &[(&exit_program(0), "ok")]);
        assert_eq!(TestRunner::default().run_test(&mut loader, &test).status, ExecutionStatus::Passed);

        let mut loader = load(&runtime, &[(&exit_program(3), "fail")]);
        assert_eq!(TestRunner::default().run_test(&mut loader, &test).status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_trap_is_crash() {
        let mut main = Function::new("main".to_string(), 0, ReturnType::Int);
        main.blocks[0].add_instruction(Instruction::unreachable());
        let program = Program::with_functions(vec![main]);

        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&program, "trap")]);
        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("trap", "main"));
        assert_eq!(outcome.status, ExecutionStatus::Crashed);
    }

    #[test]
    fn test_deadline_is_timeout() {
        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&spin_program(), "spin")]);
        let _ticker = EpochTicker::start(runtime.engine()).unwrap();

        let start = Instant::now();
        loader.set_deadline(Some(Duration::from_millis(100)));
        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("spin", "spin"));
        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_entry_is_invalid() {
        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&sum_program(), "sum")]);

        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("x", "test_missing"));
        assert_eq!(outcome.status, ExecutionStatus::Invalid);
        assert!(outcome.output.contains("test_missing"));

        let mut neg = Function::new("neg".to_string(), 1, ReturnType::Int);
        neg.blocks[0].add_instruction(Instruction::return_value(Register(0)));
        let mut loader = load(&runtime, &[(&Program::with_functions(vec![neg]), "neg")]);
        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("neg", "neg"));
        assert_eq!(outcome.status, ExecutionStatus::Invalid);
    }

    #[test]
    fn test_arguments_are_passed() {
        // main(argc, argv) returns argc - 3
        let mut main = Function::new("main".to_string(), 2, ReturnType::Int);
        main.blocks[0].add_instruction(Instruction::load_const(Register(2), Value::Int(3)));
        main.blocks[0].add_instruction(Instruction::arithmetic(Opcode::Sub, Register(3), Register(0), Register(2)));
        main.blocks[0].add_instruction(Instruction::return_value(Register(3)));
        let program = Program::with_functions(vec![main]);

        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&program, "args")]);
        let test = TestDescriptor::new("args", "main")
            .with_arguments(vec!["--quick".to_string(), "x".to_string()]);

        let outcome = TestRunner::new("prog").run_test(&mut loader, &test);
        assert_eq!(outcome.status, ExecutionStatus::Passed);

        let memory = loader.memory().unwrap();
        let mut area = [0u8; 16];
        memory.read(loader.store(), ARGUMENT_AREA_OFFSET, &mut area).unwrap();
        let first = u32::from_le_bytes([area[0], area[1], area[2], area[3]]) as usize;
        assert_eq!(first, ARGUMENT_AREA_OFFSET + 16);
        assert_eq!(&area[12..16], &[0, 0, 0, 0]);

        let mut name = [0u8; 5];
        memory.read(loader.store(), first, &mut name).unwrap();
        assert_eq!(&name, b"prog\0");
    }

    #[test]
    fn test_oversized_arguments_are_invalid() {
        let mut main = Function::new("main".to_string(), 2, ReturnType::Int);
        main.blocks[0].add_instruction(Instruction::return_value(Register(0)));
        let program = Program::with_functions(vec![main]);

        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&program, "args")]);
        let test = TestDescriptor::new("big", "main")
            .with_arguments(vec!["a".repeat(ARGUMENT_AREA_SIZE)]);

        let outcome = TestRunner::default().run_test(&mut loader, &test);
        assert_eq!(outcome.status, ExecutionStatus::Invalid);
    }

    #[test]
    fn test_constructors_and_destructors() {
        let mut program = Program::new();
        program.declare(ExternalDeclaration::new("putchar", 1, ReturnType::Int));
        program.declare(ExternalDeclaration::new("atexit", 1, ReturnType::Int));

        let putchar = |c: u8| {
            vec![
                Instruction::load_const(Register(0), Value::Int(c as i32)),
                Instruction::call("putchar", &[Register(0)], Some(Register(1))),
            ]
        };

        // slot 1
        let mut main = Function::new("main".to_string(), 0, ReturnType::Int);
        main.blocks[0].instructions.extend(putchar(b'm'));
        main.blocks[0].add_instruction(Instruction::load_const(Register(2), Value::Int(0)));
        main.blocks[0].add_instruction(Instruction::return_value(Register(2)));
        program.add_function(main);

        // slot 2
        let mut cleanup = Function::new("cleanup".to_string(), 0, ReturnType::Void);
        cleanup.blocks[0].instructions.extend(putchar(b'd'));
        cleanup.blocks[0].add_instruction(Instruction::return_void());
        program.add_function(cleanup);

        let mut init = Function::new("init".to_string(), 0, ReturnType::Void);
        init.blocks[0].instructions.extend(putchar(b'i'));
        init.blocks[0].add_instruction(Instruction::load_const(Register(2), Value::Int(2)));
        init.blocks[0].add_instruction(Instruction::call("atexit", &[Register(2)], Some(Register(3))));
        init.blocks[0].add_instruction(Instruction::return_void());
        program.add_function(init);
        program.constructors.push("init".to_string());

        let runtime = Runtime::new(ExecutionConfig::default()).unwrap();
        let mut loader = load(&runtime, &[(&program, "lifecycle")]);
        assert_eq!(loader.address_of("cleanup"), Some(2));

        let outcome = TestRunner::default().run_test(&mut loader, &TestDescriptor::new("life", "main"));
        assert_eq!(outcome.status, ExecutionStatus::Passed);
        assert_eq!(outcome.output, "imd");
    }
}
