//! Intermediate Representation (IR) for programs under mutation testing.
//!
//! Programs are modules of functions made of basic blocks of register
//! instructions. This crate defines:
//! - the instruction set and program structure
//! - validation and compilation to WebAssembly object code
//! - mutation operators, mutation points and their discovery
//! - program units, which turn mutation points into sibling function bodies

pub mod instruction;
pub mod program;
pub mod compiler;
pub mod mutation;
pub mod naming;
pub mod point;
pub mod unit;
pub mod finder;
pub mod validation;

pub use instruction::{Instruction, Opcode, Operand, Register, Value};
pub use program::{BasicBlock, ExternalDeclaration, Function, Program, ReturnType, Signature};
pub use compiler::{CompiledObject, Compiler, CompilerConfig};
pub use mutation::MutationOperator;
pub use point::{MutationPoint, MutationPointAddress};
pub use unit::{ModuleRole, ProgramUnit};
pub use finder::MutationsFinder;
pub use validation::validate_program;
