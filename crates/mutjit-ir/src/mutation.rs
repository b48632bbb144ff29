//! Mutation operators for IR programs.

use crate::instruction::{Instruction, Opcode, Operand, Value};
use crate::naming;
use crate::point::{MutationPoint, MutationPointAddress};
use crate::program::{Function, Program};
use crate::unit::ProgramUnit;
use mutjit_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// The closed set of supported mutation operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationOperator {
    /// `+` to `-`
    MathAdd,
    /// `-` to `+`
    MathSub,
    /// `*` to `/`
    MathMul,
    /// `/` to `*`
    MathDiv,
    /// Comparison to its negation
    NegateCondition,
    /// `<` to `<=` and back, same for `>`
    ConditionalsBoundary,
    /// Delete a call to a function returning nothing
    RemoveVoidFunction,
    /// Constant `0` to `1`, anything else to `0`
    ScalarValue,
}

impl MutationOperator {
    pub fn all() -> Vec<MutationOperator> {
        vec![
            MutationOperator::MathAdd,
            MutationOperator::MathSub,
            MutationOperator::MathMul,
            MutationOperator::MathDiv,
            MutationOperator::NegateCondition,
            MutationOperator::ConditionalsBoundary,
            MutationOperator::RemoveVoidFunction,
            MutationOperator::ScalarValue,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            MutationOperator::MathAdd => "math_add_mutator",
            MutationOperator::MathSub => "math_sub_mutator",
            MutationOperator::MathMul => "math_mul_mutator",
            MutationOperator::MathDiv => "math_div_mutator",
            MutationOperator::NegateCondition => "negate_condition_mutator",
            MutationOperator::ConditionalsBoundary => "conditionals_boundary_mutator",
            MutationOperator::RemoveVoidFunction => "remove_void_function_mutator",
            MutationOperator::ScalarValue => "scalar_value_mutator",
        }
    }

    pub fn from_id(id: &str) -> Option<MutationOperator> {
        Self::all().into_iter().find(|op| op.id() == id)
    }

    /// Whether the operator has a rewrite for `instruction` in `program`
    pub fn can_apply(&self, program: &Program, instruction: &Instruction) -> bool {
        match self {
            MutationOperator::RemoveVoidFunction => {
                if instruction.opcode != Opcode::Call || instruction.dest.is_some() {
                    return false;
                }
                match instruction.callee() {
                    Some(callee) if !naming::is_internal(callee) => program
                        .signature_of(callee)
                        .map(|sig| !sig.returns_value())
                        .unwrap_or(false),
                    _ => false,
                }
            }
            MutationOperator::ScalarValue => {
                instruction.opcode == Opcode::LoadConst
                    && matches!(instruction.operands.first(), Some(Operand::Immediate(_)))
            }
            _ => self.replacement_opcode(instruction.opcode).is_some(),
        }
    }

    /// Create a mutation point when the operator applies at `address` of `unit`
    pub fn try_create(
        &self,
        unit: &ProgramUnit,
        address: MutationPointAddress,
    ) -> Option<MutationPoint> {
        let program = unit.program();
        let function = program.get_function(address.function)?;
        let instruction = function.instruction(address.block, address.instruction)?;
        if !self.can_apply(program, instruction) {
            return None;
        }

        Some(MutationPoint::new(
            unit.identifier(),
            &function.name,
            address,
            *self,
            self.diagnostics(instruction),
            instruction.location.clone(),
        ))
    }

    /// Rewrite the instruction at `address` inside `function`
    pub fn apply(&self, function: &mut Function, address: MutationPointAddress) -> Result<()> {
        let block = function.blocks.get_mut(address.block).ok_or_else(|| {
            Error::Mutation(format!("{}: no block at {}", function.name, address))
        })?;
        let instruction = block.instructions.get_mut(address.instruction).ok_or_else(|| {
            Error::Mutation(format!("no instruction at {}", address))
        })?;

        match self {
            MutationOperator::RemoveVoidFunction => {
                if instruction.opcode != Opcode::Call {
                    return Err(Error::Mutation(format!(
                        "{} expects a call at {}",
                        self.id(),
                        address
                    )));
                }
                block.instructions.remove(address.instruction);
            }
            MutationOperator::ScalarValue => match instruction.operands.first_mut() {
                Some(Operand::Immediate(value)) => *value = Self::mutated_scalar(*value),
                _ => {
                    return Err(Error::Mutation(format!(
                        "{} expects a constant at {}",
                        self.id(),
                        address
                    )))
                }
            },
            _ => {
                let replacement = self.replacement_opcode(instruction.opcode).ok_or_else(|| {
                    Error::Mutation(format!(
                        "{} cannot rewrite {:?} at {}",
                        self.id(),
                        instruction.opcode,
                        address
                    ))
                })?;
                instruction.opcode = replacement;
            }
        }

        Ok(())
    }

    fn replacement_opcode(&self, opcode: Opcode) -> Option<Opcode> {
        use Opcode::*;

        match (self, opcode) {
            (MutationOperator::MathAdd, Add) => Some(Sub),
            (MutationOperator::MathSub, Sub) => Some(Add),
            (MutationOperator::MathMul, Mul) => Some(Div),
            (MutationOperator::MathDiv, Div) => Some(Mul),
            (MutationOperator::NegateCondition, Eq) => Some(Ne),
            (MutationOperator::NegateCondition, Ne) => Some(Eq),
            (MutationOperator::NegateCondition, Lt) => Some(Ge),
            (MutationOperator::NegateCondition, Le) => Some(Gt),
            (MutationOperator::NegateCondition, Gt) => Some(Le),
            (MutationOperator::NegateCondition, Ge) => Some(Lt),
            (MutationOperator::ConditionalsBoundary, Lt) => Some(Le),
            (MutationOperator::ConditionalsBoundary, Le) => Some(Lt),
            (MutationOperator::ConditionalsBoundary, Gt) => Some(Ge),
            (MutationOperator::ConditionalsBoundary, Ge) => Some(Gt),
            _ => None,
        }
    }

    fn mutated_scalar(value: Value) -> Value {
        match value {
            Value::Int(0) => Value::Int(1),
            Value::Int(_) => Value::Int(0),
            Value::Bool(b) => Value::Bool(!b),
        }
    }

    fn diagnostics(&self, instruction: &Instruction) -> String {
        let prefix = match self {
            MutationOperator::MathAdd => "Math Add",
            MutationOperator::MathSub => "Math Sub",
            MutationOperator::MathMul => "Math Mul",
            MutationOperator::MathDiv => "Math Div",
            MutationOperator::NegateCondition => "Negate Condition",
            MutationOperator::ConditionalsBoundary => "Conditionals Boundary",
            MutationOperator::RemoveVoidFunction => {
                return format!(
                    "Remove Void Call: removed {}",
                    instruction.callee().unwrap_or_default()
                )
            }
            MutationOperator::ScalarValue => {
                return match instruction.operands.first() {
                    Some(Operand::Immediate(value)) => format!(
                        "Scalar Value: replaced {} with {}",
                        value,
                        Self::mutated_scalar(*value)
                    ),
                    _ => "Scalar Value".to_string(),
                }
            }
        };

        match self.replacement_opcode(instruction.opcode) {
            Some(replacement) => format!(
                "{}: replaced {} with {}",
                prefix,
                instruction.opcode.symbol(),
                replacement.symbol()
            ),
            None => prefix.to_string(),
        }
    }
}

impl std::fmt::Display for MutationOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Register;
    use crate::program::{ExternalDeclaration, ReturnType};
    use crate::unit::ModuleRole;

    fn unit() -> ProgramUnit {
        let mut program = Program::new();
        program.declare(ExternalDeclaration::new("log_value", 1, ReturnType::Void));
        program.declare(ExternalDeclaration::new("putchar", 1, ReturnType::Int));

        let mut func = Function::new("calc".to_string(), 2, ReturnType::Int);
        let block = &mut func.blocks[0];
        block.add_instruction(Instruction::arithmetic(Opcode::Add, Register(2), Register(0), Register(1)));
        block.add_instruction(Instruction::arithmetic(Opcode::Lt, Register(3), Register(0), Register(1)));
        block.add_instruction(Instruction::load_const(Register(4), Value::Int(7)));
        block.add_instruction(Instruction::call("log_value", &[Register(2)], None));
        block.add_instruction(Instruction::call("putchar", &[Register(2)], None));
        block.add_instruction(Instruction::return_value(Register(2)));
        program.add_function(func);

        ProgramUnit::new(program, ModuleRole::Source, "src/calc.ir").unwrap()
    }

    #[test]
    fn test_operator_ids_round_trip() {
        for op in MutationOperator::all() {
            assert_eq!(MutationOperator::from_id(op.id()), Some(op));
        }
        assert_eq!(MutationOperator::from_id("nope"), None);
    }

    #[test]
    fn test_try_create_math_add() {
        let unit = unit();
        let point = MutationOperator::MathAdd
            .try_create(&unit, MutationPointAddress::new(0, 0, 0))
            .unwrap();
        assert_eq!(point.diagnostics, "Math Add: replaced + with -");
        assert_eq!(point.function, "calc");
        assert!(MutationOperator::MathAdd
            .try_create(&unit, MutationPointAddress::new(0, 0, 1))
            .is_none());
    }

    #[test]
    fn test_condition_operators() {
        let unit = unit();
        let address = MutationPointAddress::new(0, 0, 1);
        let negate = MutationOperator::NegateCondition.try_create(&unit, address).unwrap();
        assert_eq!(negate.diagnostics, "Negate Condition: replaced < with >=");
        let boundary = MutationOperator::ConditionalsBoundary
            .try_create(&unit, address)
            .unwrap();
        assert_eq!(boundary.diagnostics, "Conditionals Boundary: replaced < with <=");

        let mut func = unit.program().functions[0].clone();
        MutationOperator::ConditionalsBoundary.apply(&mut func, address).unwrap();
        assert_eq!(func.blocks[0].instructions[1].opcode, Opcode::Le);
    }

    #[test]
    fn test_scalar_value() {
        let unit = unit();
        let address = MutationPointAddress::new(0, 0, 2);
        let point = MutationOperator::ScalarValue.try_create(&unit, address).unwrap();
        assert_eq!(point.diagnostics, "Scalar Value: replaced 7 with 0");

        let mut func = unit.program().functions[0].clone();
        MutationOperator::ScalarValue.apply(&mut func, address).unwrap();
        assert_eq!(
            func.blocks[0].instructions[2].operands[0],
            Operand::Immediate(Value::Int(0))
        );
        assert_eq!(
            MutationOperator::mutated_scalar(Value::Int(0)),
            Value::Int(1)
        );
    }

    #[test]
    fn test_remove_void_function_only_targets_void_callees() {
        let unit = unit();
        let point = MutationOperator::RemoveVoidFunction
            .try_create(&unit, MutationPointAddress::new(0, 0, 3))
            .unwrap();
        assert_eq!(point.diagnostics, "Remove Void Call: removed log_value");
        assert!(MutationOperator::RemoveVoidFunction
            .try_create(&unit, MutationPointAddress::new(0, 0, 4))
            .is_none());

        let mut func = unit.program().functions[0].clone();
        MutationOperator::RemoveVoidFunction
            .apply(&mut func, point.address)
            .unwrap();
        assert_eq!(func.instruction_count(), 5);
        assert_eq!(func.blocks[0].instructions[3].callee(), Some("putchar"));
    }

    #[test]
    fn test_remove_void_function_skips_internal_symbols() {
        let mut program = Program::new();
        program.declare(ExternalDeclaration::new(naming::ENTER_FUNCTION_SYMBOL, 1, ReturnType::Void));
        let call = Instruction::call(naming::ENTER_FUNCTION_SYMBOL, &[Register(0)], None);
        assert!(!MutationOperator::RemoveVoidFunction.can_apply(&program, &call));
    }

    proptest::proptest! {
        #[test]
        fn test_scalar_mutation_always_changes_value(v in proptest::prelude::any::<i32>()) {
            proptest::prop_assert_ne!(MutationOperator::mutated_scalar(Value::Int(v)), Value::Int(v));
        }
    }

    #[test]
    fn test_apply_out_of_range() {
        let mut func = Function::new("f".to_string(), 0, ReturnType::Void);
        let result = MutationOperator::MathAdd.apply(&mut func, MutationPointAddress::new(0, 3, 0));
        assert!(matches!(result, Err(Error::Mutation(_))));
    }
}
