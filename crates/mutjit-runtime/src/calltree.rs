//! Call trees reconstructed from a traced run.
//!
//! A traced run leaves a flat mapping: `mapping[f]` is the caller that first
//! invoked function `f`, `f` itself for top-level invocations and 0 when `f`
//! never ran. Reconstruction turns it into an arena of nodes under a
//! synthetic root.

use mutjit_core::Distance;
use std::collections::{HashMap, HashSet};

const ROOT: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTreeNode {
    /// Traced function index, 0 for the synthetic root
    pub function: u64,
    /// Depth below the root
    pub level: u32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
    by_function: HashMap<u64, usize>,
}

impl CallTree {
    /// Build the tree, consuming the mapping: every slot that produced a
    /// node is cleared.
    ///
    /// Parents are materialized before their children. A parent that is
    /// out of range, never ran or would close a cycle attaches the child to
    /// the root instead.
    pub fn from_mapping(mapping: &mut [u64]) -> Self {
        let mut tree = CallTree {
            nodes: vec![CallTreeNode {
                function: 0,
                level: 0,
                parent: None,
                children: Vec::new(),
            }],
            by_function: HashMap::new(),
        };

        for function in 1..mapping.len() {
            if mapping[function] != 0 {
                tree.attach(mapping, function as u64);
            }
        }
        tree
    }

    fn attach(&mut self, mapping: &mut [u64], function: u64) {
        // Walk up to the first ancestor that already has a node
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = function;
        while !self.by_function.contains_key(&current) && seen.insert(current) {
            let parent = match mapping.get(current as usize) {
                Some(&parent) if parent != 0 => parent,
                _ => break,
            };
            chain.push(current);
            if parent == current {
                break;
            }
            current = parent;
        }

        for &node_function in chain.iter().rev() {
            let parent = mapping[node_function as usize];
            let parent_node = if parent == node_function {
                ROOT
            } else {
                self.by_function.get(&parent).copied().unwrap_or(ROOT)
            };
            self.push_node(node_function, parent_node);
            mapping[node_function as usize] = 0;
        }
    }

    fn push_node(&mut self, function: u64, parent: usize) {
        let index = self.nodes.len();
        let level = self.nodes[parent].level + 1;
        self.nodes.push(CallTreeNode {
            function,
            level,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        self.by_function.insert(function, index);
    }

    pub fn root(&self) -> &CallTreeNode {
        &self.nodes[ROOT]
    }

    pub fn nodes(&self) -> &[CallTreeNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&CallTreeNode> {
        self.nodes.get(index)
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing but the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn node_of_function(&self, function: u64) -> Option<&CallTreeNode> {
        self.by_function.get(&function).map(|&i| &self.nodes[i])
    }

    /// Every traced function except `entry`, with its distance from the
    /// top level (`level - 1`), up to `max_distance`
    pub fn testees(&self, entry: u64, max_distance: Distance) -> Vec<(u64, Distance)> {
        self.nodes
            .iter()
            .skip(1)
            .filter(|n| n.function != entry)
            .map(|n| (n.function, n.level - 1))
            .filter(|(_, distance)| *distance <= max_distance)
            .collect()
    }
}
