//! Program units: an IR module plus its identity and mutation bookkeeping.

use crate::instruction::{Instruction, Register};
use crate::naming;
use crate::point::MutationPoint;
use crate::program::{BasicBlock, Program, ReturnType};
use crate::validation::validate_program;
use mutjit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whether a module holds code under test or tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleRole {
    Source,
    Test,
}

/// One IR module with a stable, content-derived identifier
#[derive(Debug, Clone)]
pub struct ProgramUnit {
    program: Program,
    role: ModuleRole,
    path: String,
    identifier: String,
}

impl ProgramUnit {
    /// The identifier is `<path stem>_<md5 of the bincode-encoded program>`
    pub fn new(program: Program, role: ModuleRole, path: &str) -> Result<Self> {
        let digest = md5::compute(program.to_bytes()?);
        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module");
        let identifier = format!("{}_{:x}", stem, digest);

        Ok(Self {
            program,
            role,
            path: path.to_string(),
            identifier,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    pub fn role(&self) -> ModuleRole {
        self.role
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Add every mutant of `points` to the module as a sibling of its original.
    ///
    /// For each mutated function `f` the unmutated body is kept as
    /// `f_<id>_original`, each point gets a copy named by its unique
    /// identifier with the mutation applied, and `f` itself becomes a stub
    /// calling through the cell `f_<id>_trampoline`. Returns the trampoline
    /// keys (`f_<id>`) in first-seen order. Points of other modules are
    /// ignored.
    pub fn prepare_mutations(&mut self, points: &[&MutationPoint]) -> Result<Vec<String>> {
        let mut groups: Vec<(usize, Vec<&MutationPoint>)> = Vec::new();
        for point in points.iter().copied().filter(|p| p.module_id == self.identifier) {
            let index = point.address.function;
            match groups.iter_mut().find(|(f, _)| *f == index) {
                Some((_, group)) => group.push(point),
                None => groups.push((index, vec![point])),
            }
        }

        let mut keys = Vec::with_capacity(groups.len());
        for (index, group) in groups {
            let original = self
                .program
                .get_function(index)
                .cloned()
                .ok_or_else(|| {
                    Error::Mutation(format!(
                        "{} has no function at index {}",
                        self.identifier, index
                    ))
                })?;
            // the stub passes every parameter and takes the result in the next register
            let result = u8::try_from(original.num_params).map(Register).map_err(|_| {
                Error::Mutation(format!(
                    "{} takes {} parameters, too many for a trampoline stub",
                    original.name, original.num_params
                ))
            })?;
            let key = naming::trampoline_key(&original.name, &self.identifier);

            let mut preserved = original.clone();
            preserved.name = naming::original_symbol(&key);
            self.program.add_function(preserved);

            for point in group {
                let mut mutant = original.clone();
                mutant.name = point.unique_identifier();
                point.operator.apply(&mut mutant, point.address)?;
                self.program.add_function(mutant);
            }

            let args: Vec<Register> = (0..result.0).map(Register).collect();
            let cell = naming::trampoline_symbol(&key);
            let stub = match original.return_type {
                ReturnType::Int => vec![
                    Instruction::call_indirect(&cell, &args, Some(result)),
                    Instruction::return_value(result),
                ],
                ReturnType::Void => vec![
                    Instruction::call_indirect(&cell, &args, None),
                    Instruction::return_void(),
                ],
            };
            if let Some(function) = self.program.get_function_mut(index) {
                function.blocks = vec![BasicBlock::with_instructions(stub)];
                function.num_locals = usize::from(original.return_type == ReturnType::Int);
            }

            keys.push(key);
        }

        validate_program(&self.program)?;
        tracing::debug!(
            module = %self.identifier,
            trampolines = keys.len(),
            functions = self.program.num_functions(),
            "prepared mutations"
        );
        Ok(keys)
    }
}
