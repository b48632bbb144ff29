//! Validation for IR programs.

use crate::instruction::{Instruction, Opcode, Operand};
use crate::program::{Function, Program, ReturnType};
use mutjit_core::{Error, Result};
use std::collections::HashSet;

/// Most parameters a function may take; registers are numbered by `u8`
/// and a trampoline stub needs one register past the parameters.
pub const MAX_PARAMS: usize = u8::MAX as usize;

/// Validate that a program is well-formed and can be compiled
pub fn validate_program(program: &Program) -> Result<()> {
    let mut names = HashSet::new();
    for func in &program.functions {
        if !names.insert(func.name.as_str()) {
            return Err(Error::Validation(format!(
                "Duplicate function '{}'",
                func.name
            )));
        }
    }

    for func in &program.functions {
        validate_function(program, func)?;
    }

    for ctor in &program.constructors {
        match program.find_function(ctor) {
            Some(f) if f.num_params == 0 => {}
            Some(_) => {
                return Err(Error::Validation(format!(
                    "Constructor '{}' must not take parameters",
                    ctor
                )))
            }
            None => {
                return Err(Error::Validation(format!(
                    "Constructor '{}' is not defined",
                    ctor
                )))
            }
        }
    }

    Ok(())
}

fn validate_function(program: &Program, func: &Function) -> Result<()> {
    if func.num_params > MAX_PARAMS {
        return Err(Error::Validation(format!(
            "Function {} takes {} parameters, at most {} are supported",
            func.name, func.num_params, MAX_PARAMS
        )));
    }
    if func.blocks.is_empty() {
        return Err(Error::Validation(format!(
            "Function {} has no basic blocks",
            func.name
        )));
    }

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let Some(last) = block.instructions.last() else {
            return Err(Error::Validation(format!(
                "Function {} block {} is empty",
                func.name, block_idx
            )));
        };
        if !last.opcode.is_terminator() {
            return Err(Error::Validation(format!(
                "Function {} block {} does not end with a terminator",
                func.name, block_idx
            )));
        }

        for (inst_idx, inst) in block.instructions.iter().enumerate() {
            let is_last = inst_idx + 1 == block.instructions.len();
            if inst.opcode.is_terminator() && !is_last {
                return Err(Error::Validation(format!(
                    "Function {} block {}: terminator at position {}",
                    func.name, block_idx, inst_idx
                )));
            }
            validate_instruction(program, func, inst).map_err(|reason| {
                Error::Validation(format!(
                    "Function {} block {} instruction {}: {}",
                    func.name, block_idx, inst_idx, reason
                ))
            })?;
        }
    }

    Ok(())
}

fn validate_instruction(
    program: &Program,
    func: &Function,
    inst: &Instruction,
) -> std::result::Result<(), String> {
    let values = |n: usize| -> std::result::Result<(), String> {
        if inst.operands.len() != n || !inst.operands.iter().all(Operand::is_value) {
            return Err(format!("{:?} expects {} value operands", inst.opcode, n));
        }
        Ok(())
    };
    let needs_dest = || -> std::result::Result<(), String> {
        inst.dest
            .map(|_| ())
            .ok_or_else(|| format!("{:?} requires a destination", inst.opcode))
    };

    match inst.opcode {
        op if op.is_binary() => {
            values(2)?;
            needs_dest()
        }
        Opcode::Neg | Opcode::Not | Opcode::Copy | Opcode::Load => {
            values(1)?;
            needs_dest()
        }
        Opcode::LoadConst => {
            needs_dest()?;
            match inst.operands.as_slice() {
                [Operand::Immediate(_)] => Ok(()),
                _ => Err("LoadConst expects one immediate".to_string()),
            }
        }
        Opcode::Store => values(2),
        Opcode::Branch | Opcode::BranchIf => {
            let expected = if inst.opcode == Opcode::Branch { 1 } else { 2 };
            let targets = inst.successors();
            if targets.len() != expected {
                return Err(format!("{:?} expects {} targets", inst.opcode, expected));
            }
            if inst.opcode == Opcode::BranchIf && !inst.operands[0].is_value() {
                return Err("BranchIf expects a condition first".to_string());
            }
            match targets.iter().find(|t| **t as usize >= func.blocks.len()) {
                Some(t) => Err(format!("branch target {} out of range", t)),
                None => Ok(()),
            }
        }
        Opcode::Call | Opcode::CallIndirect => {
            let callee = inst
                .callee()
                .ok_or_else(|| "call without a callee symbol".to_string())?;
            if !inst.call_arguments().iter().all(Operand::is_value) {
                return Err("call arguments must be values".to_string());
            }
            if inst.opcode == Opcode::CallIndirect {
                return Ok(());
            }
            let sig = program
                .signature_of(callee)
                .ok_or_else(|| format!("call to undeclared function '{}'", callee))?;
            if sig.num_params != inst.call_arguments().len() {
                return Err(format!(
                    "'{}' takes {} arguments, {} given",
                    callee,
                    sig.num_params,
                    inst.call_arguments().len()
                ));
            }
            if inst.dest.is_some() && !sig.returns_value() {
                return Err(format!("'{}' returns no value", callee));
            }
            Ok(())
        }
        Opcode::Return => match (func.return_type, inst.operands.as_slice()) {
            (ReturnType::Void, []) => Ok(()),
            (ReturnType::Int, [op]) if op.is_value() => Ok(()),
            _ => Err("return does not match the function's return type".to_string()),
        },
        Opcode::Unreachable => Ok(()),
        op => Err(format!("unsupported opcode {:?}", op)),
    }
}
