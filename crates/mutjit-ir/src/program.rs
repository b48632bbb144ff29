//! Program structure: modules of functions made of basic blocks.

use crate::instruction::Instruction;
use mutjit_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A basic block is a sequence of instructions with no internal control flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn add_instruction(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.opcode.is_terminator())
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnType {
    Void,
    Int,
}

/// Calling convention of a function: `i32` parameters, optional `i32` result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub num_params: usize,
    pub return_type: ReturnType,
}

impl Signature {
    pub fn new(num_params: usize, return_type: ReturnType) -> Self {
        Self {
            num_params,
            return_type,
        }
    }

    pub fn returns_value(&self) -> bool {
        self.return_type == ReturnType::Int
    }
}

/// A function contains multiple basic blocks; block 0 is the entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub num_params: usize,
    pub num_locals: usize,
    pub blocks: Vec<BasicBlock>,
    pub return_type: ReturnType,
}

impl Function {
    pub fn new(name: String, num_params: usize, return_type: ReturnType) -> Self {
        Self {
            name,
            num_params,
            num_locals: 0,
            blocks: vec![BasicBlock::new()],
            return_type,
        }
    }

    pub fn add_block(&mut self, block: BasicBlock) -> u32 {
        self.blocks.push(block);
        (self.blocks.len() - 1) as u32
    }

    pub fn get_block_mut(&mut self, index: usize) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(index)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn signature(&self) -> Signature {
        Signature::new(self.num_params, self.return_type)
    }

    pub fn instruction(&self, block: usize, index: usize) -> Option<&Instruction> {
        self.blocks.get(block)?.instructions.get(index)
    }

    pub fn instruction_mut(&mut self, block: usize, index: usize) -> Option<&mut Instruction> {
        self.blocks.get_mut(block)?.instructions.get_mut(index)
    }

    /// Count total instructions in the function
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    /// Number of registers the function needs, parameters included
    pub fn register_count(&self) -> usize {
        let used = self
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .flat_map(|i| i.registers())
            .map(|r| r.0 as usize + 1)
            .max()
            .unwrap_or(0);
        used.max(self.num_params + self.num_locals)
    }
}

/// A function implemented outside the program (another module or the host)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDeclaration {
    pub name: String,
    pub num_params: usize,
    pub return_type: ReturnType,
}

impl ExternalDeclaration {
    pub fn new(name: &str, num_params: usize, return_type: ReturnType) -> Self {
        Self {
            name: name.to_string(),
            num_params,
            return_type,
        }
    }

    pub fn signature(&self) -> Signature {
        Signature::new(self.num_params, self.return_type)
    }
}

/// A complete IR module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    #[serde(default)]
    pub declarations: Vec<ExternalDeclaration>,
    /// Functions run before any test entry point, in order
    #[serde(default)]
    pub constructors: Vec<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Program {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            declarations: Vec::new(),
            constructors: Vec::new(),
            version: 1,
        }
    }

    pub fn with_functions(functions: Vec<Function>) -> Self {
        Self {
            functions,
            ..Self::new()
        }
    }

    pub fn add_function(&mut self, function: Function) -> u32 {
        self.functions.push(function);
        (self.functions.len() - 1) as u32
    }

    pub fn declare(&mut self, declaration: ExternalDeclaration) {
        self.declarations.push(declaration);
    }

    pub fn get_function(&self, index: usize) -> Option<&Function> {
        self.functions.get(index)
    }

    pub fn get_function_mut(&mut self, index: usize) -> Option<&mut Function> {
        self.functions.get_mut(index)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    /// Signature of a defined or declared function
    pub fn signature_of(&self, name: &str) -> Option<Signature> {
        self.find_function(name)
            .map(|f| f.signature())
            .or_else(|| {
                self.declarations
                    .iter()
                    .find(|d| d.name == name)
                    .map(|d| d.signature())
            })
    }

    /// Callees referenced by direct calls but not defined here, sorted
    pub fn undefined_symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .filter(|i| i.opcode == crate::Opcode::Call)
            .filter_map(|i| i.callee())
            .filter(|name| self.find_function(name).is_none())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Count total instructions in the program
    pub fn total_instructions(&self) -> usize {
        self.functions.iter().map(|f| f.instruction_count()).sum()
    }

    /// Serialize the program to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a program from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
