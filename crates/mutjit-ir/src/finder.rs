//! Discovery of mutation points in the functions reached by tests.

use crate::mutation::MutationOperator;
use crate::point::{MutationPoint, MutationPointAddress};
use crate::unit::ProgramUnit;
use mutjit_core::{Distance, TestId};
use std::collections::HashMap;

/// Finds mutation points once per function and records every test reaching them
pub struct MutationsFinder {
    operators: Vec<MutationOperator>,
    cache: HashMap<(String, usize), Vec<MutationPoint>>,
    order: Vec<(String, usize)>,
}

impl MutationsFinder {
    pub fn new(operators: Vec<MutationOperator>) -> Self {
        Self {
            operators,
            cache: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Record that `test` reaches function `function` of `unit` at `distance`
    pub fn record(&mut self, unit: &ProgramUnit, function: usize, test: &TestId, distance: Distance) {
        let key = (unit.identifier().to_string(), function);
        if let Some(points) = self.cache.get_mut(&key) {
            for point in points.iter_mut() {
                point.add_reachable_test(test.clone(), distance);
            }
            return;
        }

        let mut points = Vec::new();
        if let Some(func) = unit.program().get_function(function) {
            for operator in &self.operators {
                for (block_idx, block) in func.blocks.iter().enumerate() {
                    for inst_idx in 0..block.instructions.len() {
                        let address = MutationPointAddress::new(function, block_idx, inst_idx);
                        if let Some(mut point) = operator.try_create(unit, address) {
                            point.add_reachable_test(test.clone(), distance);
                            points.push(point);
                        }
                    }
                }
            }
        }

        tracing::trace!(
            module = unit.identifier(),
            function,
            points = points.len(),
            "found mutation points"
        );
        self.order.push(key.clone());
        self.cache.insert(key, points);
    }

    /// All points found so far, in discovery order
    pub fn into_points(self) -> Vec<MutationPoint> {
        let mut cache = self.cache;
        self.order
            .into_iter()
            .filter_map(|key| cache.remove(&key))
            .flatten()
            .collect()
    }
}

impl Default for MutationsFinder {
    fn default() -> Self {
        Self::new(MutationOperator::all())
    }
}
