//! Per-mutant aggregation of execution results.

use crate::ExecutionStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verdict for one mutant over all the tests that reached it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutantVerdict {
    /// At least one test detected the mutant
    Killed,
    /// Every reachable test passed
    Survived,
    /// At least one execution was Invalid
    Invalid,
}

/// Aggregated statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationSummary {
    pub mutants: usize,
    pub killed: usize,
    pub survived: usize,
    pub invalid: usize,
    /// Survived mutants by unique identifier, sorted
    pub survivors: Vec<String>,
}

impl MutationSummary {
    /// Build a summary from `(mutation point identifier, status)` pairs
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, ExecutionStatus)>,
    {
        let mut verdicts: BTreeMap<&str, MutantVerdict> = BTreeMap::new();
        for (mutant, status) in results {
            let verdict = verdicts.entry(mutant).or_insert(MutantVerdict::Survived);
            *verdict = match (*verdict, status) {
                (MutantVerdict::Invalid, _) | (_, ExecutionStatus::Invalid) => MutantVerdict::Invalid,
                (_, s) if s.kills_mutant() => MutantVerdict::Killed,
                (v, _) => v,
            };
        }

        let mut summary = MutationSummary {
            mutants: verdicts.len(),
            ..Default::default()
        };
        for (mutant, verdict) in verdicts {
            match verdict {
                MutantVerdict::Killed => summary.killed += 1,
                MutantVerdict::Invalid => summary.invalid += 1,
                MutantVerdict::Survived => {
                    summary.survived += 1;
                    summary.survivors.push(mutant.to_string());
                }
            }
        }
        summary
    }

    /// `killed / (killed + survived)`, or `None` when nothing was scored
    pub fn score(&self) -> Option<f64> {
        let scored = self.killed + self.survived;
        if scored == 0 {
            None
        } else {
            Some(self.killed as f64 / scored as f64)
        }
    }
}
