//! JIT runtime for executing compiled program images.
//!
//! This crate provides the machinery that runs tests against mutants:
//! - object files compiled once and shared by every worker
//! - a loader that links object sets into one image per store
//! - symbol resolvers, trampoline cells and native host symbols
//! - the test runner, process sandboxes and the call-tree tracer

pub mod calltree;
pub mod context;
pub mod deadline;
pub mod loader;
pub mod natives;
pub mod resolver;
pub mod runner;
pub mod sandbox;
pub mod tracer;
pub mod trampoline;

pub use calltree::{CallTree, CallTreeNode};
pub use context::{Destructor, ImageState};
pub use deadline::EpochTicker;
pub use loader::JitLoader;
pub use natives::{NativeSymbol, ProgramExit};
pub use resolver::{
    HostProcessSymbols, ResolverChain, RuntimeOverrides, SymbolDefinition, SymbolResolver,
};
pub use runner::TestRunner;
pub use sandbox::{NullProcessSandbox, ProcessSandbox};
#[cfg(unix)]
pub use sandbox::ForkProcessSandbox;
pub use tracer::{CallTreeTracer, InstrumentationInfo, Trace};
pub use trampoline::TrampolineTable;

use mutjit_core::{Error, ExecutionConfig, Result};
use mutjit_ir::{CompiledObject, Compiler, CompilerConfig, Program, Signature};
use wasmtime::*;

/// One compiled IR module: machine code plus its symbol information.
///
/// The machine code is immutable and cheap to clone, so one set of object
/// files serves every worker.
#[derive(Clone)]
pub struct ObjectFile {
    pub module_id: String,
    pub module: Module,
    pub defined: Vec<String>,
    pub undefined: Vec<(String, Signature)>,
    pub constructors: Vec<String>,
    pub instrumented: bool,
}

impl ObjectFile {
    /// Signature the object expects for an undefined symbol
    pub fn expected_signature(&self, symbol: &str) -> Option<Signature> {
        self.undefined
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, sig)| *sig)
    }
}

impl std::fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFile")
            .field("module_id", &self.module_id)
            .field("defined", &self.defined.len())
            .field("undefined", &self.undefined.len())
            .field("instrumented", &self.instrumented)
            .finish()
    }
}

/// The JIT runtime manager
pub struct Runtime {
    engine: Engine,
    config: ExecutionConfig,
}

impl Runtime {
    pub fn new(config: ExecutionConfig) -> Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.max_wasm_stack(config.max_wasm_stack);
        wasm_config.epoch_interruption(true);

        let engine = Engine::new(&wasm_config)
            .map_err(|e| Error::Wasm(format!("Failed to create engine: {}", e)))?;

        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Compile an IR module to machine code
    pub fn compile(&self, program: &Program, module_id: &str, instrument: bool) -> Result<ObjectFile> {
        let compiler = Compiler::new(CompilerConfig {
            instrument,
            ..Default::default()
        });
        let object = compiler.compile(program, module_id)?;
        self.load_object(object)
    }

    /// JIT-compile already encoded object code
    pub fn load_object(&self, object: CompiledObject) -> Result<ObjectFile> {
        let module = Module::new(&self.engine, &object.bytes).map_err(|e| {
            Error::Wasm(format!("Failed to compile module {}: {}", object.module_id, e))
        })?;

        Ok(ObjectFile {
            module_id: object.module_id,
            module,
            defined: object.defined,
            undefined: object.undefined,
            constructors: object.constructors,
            instrumented: object.instrumented,
        })
    }

    /// A fresh loader with its own store
    pub fn loader(&self) -> JitLoader {
        JitLoader::new(&self.engine, self.config.memory_pages)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small programs shared by the runtime tests.

    use mutjit_ir::{
        BasicBlock, ExternalDeclaration, Function, Instruction, Opcode, Program, Register,
        ReturnType, Value,
    };

    /// `sum(a, b) = a + b`
    pub fn sum_program() -> Program {
        let mut sum = Function::new("sum".to_string(), 2, ReturnType::Int);
        sum.blocks[0].add_instruction(Instruction::arithmetic(
            Opcode::Add,
            Register(2),
            Register(0),
            Register(1),
        ));
        sum.blocks[0].add_instruction(Instruction::return_value(Register(2)));
        Program::with_functions(vec![sum])
    }

    /// `test_sum` returns 0 when `sum(2, 3) == 5`, 1 otherwise
    pub fn sum_test_program() -> Program {
        let mut program = Program::new();
        program.declare(ExternalDeclaration::new("sum", 2, ReturnType::Int));

        let mut test = Function::new("test_sum".to_string(), 0, ReturnType::Int);
        test.blocks[0].add_instruction(Instruction::load_const(Register(0), Value::Int(2)));
        test.blocks[0].add_instruction(Instruction::load_const(Register(1), Value::Int(3)));
        test.blocks[0].add_instruction(Instruction::call(
            "sum",
            &[Register(0), Register(1)],
            Some(Register(2)),
        ));
        test.blocks[0].add_instruction(Instruction::load_const(Register(3), Value::Int(5)));
        test.blocks[0].add_instruction(Instruction::arithmetic(
            Opcode::Eq,
            Register(4),
            Register(2),
            Register(3),
        ));
        test.blocks[0].add_instruction(Instruction::branch_if(Register(4), 1, 2));
        test.add_block(BasicBlock::with_instructions(vec![
            Instruction::load_const(Register(5), Value::Int(0)),
            Instruction::return_value(Register(5)),
        ]));
        test.add_block(BasicBlock::with_instructions(vec![
            Instruction::load_const(Register(5), Value::Int(1)),
            Instruction::return_value(Register(5)),
        ]));
        program.add_function(test);
        program
    }

    /// A function that loops forever
    pub fn spin_program() -> Program {
        let mut spin = Function::new("spin".to_string(), 0, ReturnType::Int);
        spin.blocks[0].add_instruction(Instruction::branch(0));
        Program::with_functions(vec![spin])
    }
}
