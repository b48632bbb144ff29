//! Programs and fixtures shared by the engine tests.

use mutjit_core::{TestDescriptor, TestId};
use mutjit_ir::{
    BasicBlock, ExternalDeclaration, Function, Instruction, ModuleRole, MutationOperator,
    MutationPoint, MutationsFinder, Opcode, Program, ProgramUnit, Register, ReturnType, Value,
};
use mutjit_runtime::{ObjectFile, Runtime};
use std::collections::HashMap;
use std::sync::Arc;

/// `sum(a, b) = a + b` and `max(a, b)`
pub fn math_program() -> Program {
    let mut sum = Function::new("sum".to_string(), 2, ReturnType::Int);
    sum.blocks[0].add_instruction(Instruction::arithmetic(
        Opcode::Add,
        Register(2),
        Register(0),
        Register(1),
    ));
    sum.blocks[0].add_instruction(Instruction::return_value(Register(2)));

    let mut max = Function::new("max".to_string(), 2, ReturnType::Int);
    max.blocks[0].add_instruction(Instruction::arithmetic(
        Opcode::Gt,
        Register(2),
        Register(0),
        Register(1),
    ));
    max.blocks[0].add_instruction(Instruction::branch_if(Register(2), 1, 2));
    max.add_block(BasicBlock::with_instructions(vec![Instruction::return_value(Register(0))]));
    max.add_block(BasicBlock::with_instructions(vec![Instruction::return_value(Register(1))]));

    Program::with_functions(vec![sum, max])
}

/// A test returning 0 when `callee(a, b) == expected`
fn check_call(name: &str, callee: &str, a: i32, b: i32, expected: i32) -> Function {
    let mut test = Function::new(name.to_string(), 0, ReturnType::Int);
    let block = &mut test.blocks[0];
    block.add_instruction(Instruction::load_const(Register(0), Value::Int(a)));
    block.add_instruction(Instruction::load_const(Register(1), Value::Int(b)));
    block.add_instruction(Instruction::call(callee, &[Register(0), Register(1)], Some(Register(2))));
    block.add_instruction(Instruction::load_const(Register(3), Value::Int(expected)));
    block.add_instruction(Instruction::arithmetic(
        Opcode::Ne,
        Register(4),
        Register(2),
        Register(3),
    ));
    block.add_instruction(Instruction::return_value(Register(4)));
    test
}

pub fn math_tests_program() -> Program {
    let mut program = Program::new();
    program.declare(ExternalDeclaration::new("sum", 2, ReturnType::Int));
    program.declare(ExternalDeclaration::new("max", 2, ReturnType::Int));
    program.add_function(check_call("test_sum", "sum", 2, 3, 5));
    program.add_function(check_call("test_sum_zero", "sum", 0, 0, 0));
    program.add_function(check_call("test_max", "max", 3, 1, 3));
    program
}

pub fn units() -> Vec<ProgramUnit> {
    vec![
        ProgramUnit::new(math_program(), ModuleRole::Source, "src/math.ir").unwrap(),
        ProgramUnit::new(math_tests_program(), ModuleRole::Test, "tests/math_test.ir").unwrap(),
    ]
}

pub fn tests() -> Vec<TestDescriptor> {
    vec![
        TestDescriptor::new("test_sum", "test_sum"),
        TestDescriptor::new("test_sum_zero", "test_sum_zero"),
        TestDescriptor::new("test_max", "test_max"),
    ]
}

/// A prepared and compiled mutated object set
pub struct Fixture {
    pub runtime: Runtime,
    pub objects: Vec<ObjectFile>,
    pub trampolines: Vec<String>,
    pub points: Vec<Arc<MutationPoint>>,
    pub tests: HashMap<TestId, TestDescriptor>,
}

/// Points for `sum` (reached by both sum tests) and `max` (reached by test_max)
pub fn fixture() -> Fixture {
    let mut units = units();
    let mut finder = MutationsFinder::new(MutationOperator::all());
    finder.record(&units[0], 0, &TestId::new("test_sum"), 1);
    finder.record(&units[0], 0, &TestId::new("test_sum_zero"), 1);
    finder.record(&units[0], 1, &TestId::new("test_max"), 1);
    let points = finder.into_points();

    let refs: Vec<&MutationPoint> = points.iter().collect();
    let trampolines = units[0].prepare_mutations(&refs).unwrap();

    let runtime = Runtime::new(Default::default()).unwrap();
    let objects = units
        .iter()
        .map(|u| runtime.compile(u.program(), u.identifier(), false).unwrap())
        .collect();

    Fixture {
        runtime,
        objects,
        trampolines,
        points: points.into_iter().map(Arc::new).collect(),
        tests: tests().into_iter().map(|t| (t.id(), t)).collect(),
    }
}
