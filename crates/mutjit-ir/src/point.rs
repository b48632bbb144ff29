//! Mutation points: stable addresses of candidate edits.

use crate::mutation::MutationOperator;
use mutjit_core::{Distance, SourceLocation, TestId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an instruction inside a module: function, basic block, instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationPointAddress {
    pub function: usize,
    pub block: usize,
    pub instruction: usize,
}

impl MutationPointAddress {
    pub fn new(function: usize, block: usize, instruction: usize) -> Self {
        Self {
            function,
            block,
            instruction,
        }
    }

    /// `<fn>_<bb>_<instr>`
    pub fn identifier(&self) -> String {
        format!("{}_{}_{}", self.function, self.block, self.instruction)
    }
}

impl fmt::Display for MutationPointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

/// One candidate edit together with the tests known to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPoint {
    pub module_id: String,
    /// Name of the function the edit lives in
    pub function: String,
    pub address: MutationPointAddress,
    pub operator: MutationOperator,
    pub diagnostics: String,
    pub location: Option<SourceLocation>,
    /// In discovery order
    pub reachable_tests: Vec<(TestId, Distance)>,
}

impl MutationPoint {
    pub fn new(
        module_id: &str,
        function: &str,
        address: MutationPointAddress,
        operator: MutationOperator,
        diagnostics: String,
        location: Option<SourceLocation>,
    ) -> Self {
        Self {
            module_id: module_id.to_string(),
            function: function.to_string(),
            address,
            operator,
            diagnostics,
            location,
            reachable_tests: Vec::new(),
        }
    }

    /// `<module-id>_<fn>_<bb>_<instr>_<operator-id>`, also the mutant body's symbol
    pub fn unique_identifier(&self) -> String {
        format!(
            "{}_{}_{}",
            self.module_id,
            self.address.identifier(),
            self.operator.id()
        )
    }

    pub fn add_reachable_test(&mut self, test: TestId, distance: Distance) {
        self.reachable_tests.push((test, distance));
    }
}
