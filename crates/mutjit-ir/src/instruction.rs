//! Instruction set of the program IR.

use mutjit_core::SourceLocation;
use serde::{Deserialize, Serialize};

/// Register identifier (local variable). Parameters occupy the first registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Register(pub u8);

/// Immediate value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Bool(bool),
}

impl Value {
    pub fn as_i32(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            Value::Bool(v) => *v as i32,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Bool(v) => *v,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// IR Opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,
    Xor,
    Not,

    // Data movement
    Copy,
    LoadConst,
    Load,  // 32-bit load from linear memory
    Store, // 32-bit store to linear memory

    // Control flow
    Branch,       // Unconditional jump
    BranchIf,     // Two-way conditional jump
    Call,         // Call a function by symbol
    CallIndirect, // Call the address held by a named cell
    Return,
    Unreachable,
}

impl Opcode {
    /// Returns true if this opcode ends a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Branch | Opcode::BranchIf | Opcode::Return | Opcode::Unreachable
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Opcode::Call | Opcode::CallIndirect)
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Eq
                | Opcode::Ne
                | Opcode::Lt
                | Opcode::Le
                | Opcode::Gt
                | Opcode::Ge
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
        )
    }

    /// Source-level spelling used in mutation diagnostics
    pub fn symbol(&self) -> &'static str {
        match self {
            Opcode::Add => "+",
            Opcode::Sub => "-",
            Opcode::Mul => "*",
            Opcode::Div => "/",
            Opcode::Mod => "%",
            Opcode::Neg => "-",
            Opcode::Eq => "==",
            Opcode::Ne => "!=",
            Opcode::Lt => "<",
            Opcode::Le => "<=",
            Opcode::Gt => ">",
            Opcode::Ge => ">=",
            Opcode::And => "&",
            Opcode::Or => "|",
            Opcode::Xor => "^",
            Opcode::Not => "!",
            Opcode::Copy => "=",
            Opcode::LoadConst => "const",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Branch => "br",
            Opcode::BranchIf => "br_if",
            Opcode::Call => "call",
            Opcode::CallIndirect => "call_indirect",
            Opcode::Return => "return",
            Opcode::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register(Register),
    Immediate(Value),
    BlockIndex(u32),
    Symbol(String),
}

impl Operand {
    /// Whether the operand can be pushed as an `i32` value
    pub fn is_value(&self) -> bool {
        matches!(self, Operand::Register(_) | Operand::Immediate(_))
    }
}

/// A single instruction in the IR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dest: Option<Register>,
    pub operands: Vec<Operand>,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            dest: None,
            operands: Vec::new(),
            location: None,
        }
    }

    pub fn with_dest(mut self, reg: Register) -> Self {
        self.dest = Some(reg);
        self
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Create a simple arithmetic instruction
    pub fn arithmetic(opcode: Opcode, dest: Register, a: Register, b: Register) -> Self {
        Self::new(opcode)
            .with_dest(dest)
            .with_operands(vec![Operand::Register(a), Operand::Register(b)])
    }

    /// Create a load constant instruction
    pub fn load_const(dest: Register, value: Value) -> Self {
        Self::new(Opcode::LoadConst)
            .with_dest(dest)
            .with_operand(Operand::Immediate(value))
    }

    pub fn copy(dest: Register, src: Register) -> Self {
        Self::new(Opcode::Copy)
            .with_dest(dest)
            .with_operand(Operand::Register(src))
    }

    /// `dest = memory[address]`
    pub fn load(dest: Register, address: Operand) -> Self {
        Self::new(Opcode::Load).with_dest(dest).with_operand(address)
    }

    /// `memory[address] = value`
    pub fn store(address: Operand, value: Operand) -> Self {
        Self::new(Opcode::Store).with_operands(vec![address, value])
    }

    /// Create a branch instruction
    pub fn branch(block: u32) -> Self {
        Self::new(Opcode::Branch).with_operand(Operand::BlockIndex(block))
    }

    /// Create a conditional branch instruction
    pub fn branch_if(condition: Register, then_block: u32, else_block: u32) -> Self {
        Self::new(Opcode::BranchIf).with_operands(vec![
            Operand::Register(condition),
            Operand::BlockIndex(then_block),
            Operand::BlockIndex(else_block),
        ])
    }

    /// Direct call of `callee` with register arguments
    pub fn call(callee: &str, args: &[Register], dest: Option<Register>) -> Self {
        let mut inst = Self::new(Opcode::Call).with_operand(Operand::Symbol(callee.to_string()));
        inst.operands
            .extend(args.iter().map(|r| Operand::Register(*r)));
        inst.dest = dest;
        inst
    }

    /// Call through the address currently stored in `cell`
    pub fn call_indirect(cell: &str, args: &[Register], dest: Option<Register>) -> Self {
        let mut inst = Self::call(cell, args, dest);
        inst.opcode = Opcode::CallIndirect;
        inst
    }

    /// Create a return instruction
    pub fn return_void() -> Self {
        Self::new(Opcode::Return)
    }

    pub fn return_value(reg: Register) -> Self {
        Self::new(Opcode::Return).with_operand(Operand::Register(reg))
    }

    pub fn unreachable() -> Self {
        Self::new(Opcode::Unreachable)
    }

    /// Symbol named by a call instruction
    pub fn callee(&self) -> Option<&str> {
        if !self.opcode.is_call() {
            return None;
        }
        match self.operands.first() {
            Some(Operand::Symbol(name)) => Some(name),
            _ => None,
        }
    }

    /// Value arguments of a call instruction
    pub fn call_arguments(&self) -> &[Operand] {
        if self.opcode.is_call() && !self.operands.is_empty() {
            &self.operands[1..]
        } else {
            &[]
        }
    }

    /// Block indices this instruction may transfer control to
    pub fn successors(&self) -> Vec<u32> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::BlockIndex(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    /// Every register read or written by the instruction
    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        self.dest.into_iter().chain(self.operands.iter().filter_map(|op| match op {
            Operand::Register(r) => Some(*r),
            _ => None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let v = Value::Int(42);
        assert_eq!(v.as_i32(), 42);
        assert!(v.as_bool());

        let v = Value::Bool(false);
        assert_eq!(v.as_i32(), 0);
        assert!(!v.as_bool());
    }

    #[test]
    fn test_opcode_properties() {
        assert!(Opcode::Branch.is_terminator());
        assert!(Opcode::Unreachable.is_terminator());
        assert!(!Opcode::Call.is_terminator());
        assert!(Opcode::CallIndirect.is_call());

        assert!(Opcode::Le.is_binary());
        assert!(!Opcode::Not.is_binary());
        assert_eq!(Opcode::Ge.symbol(), ">=");
    }

    #[test]
    fn test_instruction_builders() {
        let inst = Instruction::arithmetic(Opcode::Add, Register(0), Register(1), Register(2));
        assert_eq!(inst.opcode, Opcode::Add);
        assert_eq!(inst.dest, Some(Register(0)));
        assert_eq!(inst.operands.len(), 2);

        let inst = Instruction::branch_if(Register(0), 1, 2);
        assert_eq!(inst.successors(), vec![1, 2]);

        let inst = Instruction::call("sum", &[Register(0), Register(1)], Some(Register(2)));
        assert_eq!(inst.callee(), Some("sum"));
        assert_eq!(inst.call_arguments().len(), 2);

        let inst = Instruction::call_indirect("sum_m1_trampoline", &[Register(0)], None);
        assert_eq!(inst.opcode, Opcode::CallIndirect);
        assert_eq!(inst.callee(), Some("sum_m1_trampoline"));
        assert_eq!(Instruction::return_void().callee(), None);
    }

    #[test]
    fn test_registers() {
        let inst = Instruction::arithmetic(Opcode::Mul, Register(3), Register(1), Register(2));
        let regs: Vec<_> = inst.registers().collect();
        assert_eq!(regs, vec![Register(3), Register(1), Register(2)]);
    }
}
