//! Dynamic call-tree tracing of instrumented images.

use crate::calltree::CallTree;
use crate::loader::JitLoader;
use crate::natives::NativeSymbol;
use crate::resolver::{SymbolDefinition, SymbolResolver};
use crate::runner::TestRunner;
use crate::ObjectFile;
use mutjit_core::{Distance, Error, Result, TestDescriptor, TestOutcome};
use mutjit_ir::naming;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A function of the instrumented object set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedFunction {
    pub module_id: String,
    /// Index of the function inside its module
    pub local_index: usize,
    pub name: String,
}

/// Global function numbering of an instrumented object set.
///
/// Each module gets a function index offset so that hook arguments
/// (`offset + local index`) are unique across the image. Index 0 is
/// reserved for the call tree root.
#[derive(Debug, Clone)]
pub struct InstrumentationInfo {
    offsets: HashMap<String, u32>,
    functions: Vec<Option<TracedFunction>>,
}

impl InstrumentationInfo {
    pub fn new(objects: &[ObjectFile]) -> Self {
        let mut offsets = HashMap::new();
        let mut functions = vec![None];
        for object in objects {
            offsets.insert(object.module_id.clone(), functions.len() as u32);
            for (local_index, name) in object.defined.iter().enumerate() {
                functions.push(Some(TracedFunction {
                    module_id: object.module_id.clone(),
                    local_index,
                    name: name.clone(),
                }));
            }
        }
        Self { offsets, functions }
    }

    /// Size of the mapping a traced run records into
    pub fn mapping_len(&self) -> usize {
        self.functions.len()
    }

    pub fn offset_of(&self, module_id: &str) -> Option<u32> {
        self.offsets.get(module_id).copied()
    }

    pub fn function(&self, index: u64) -> Option<&TracedFunction> {
        self.functions.get(index as usize)?.as_ref()
    }

    pub fn index_of(&self, name: &str) -> Option<u64> {
        self.functions
            .iter()
            .position(|f| f.as_ref().is_some_and(|f| f.name == name))
            .map(|i| i as u64)
    }
}

impl SymbolResolver for InstrumentationInfo {
    fn find_symbol(&self, name: &str) -> Option<SymbolDefinition> {
        match name {
            naming::ENTER_FUNCTION_SYMBOL => Some(SymbolDefinition::Native(NativeSymbol::EnterFunction)),
            naming::LEAVE_FUNCTION_SYMBOL => Some(SymbolDefinition::Native(NativeSymbol::LeaveFunction)),
            _ => {
                let module = naming::module_of_function_index_offset(name)?;
                self.offset_of(module)
                    .map(|offset| SymbolDefinition::Constant(offset as i32))
            }
        }
    }
}

/// Result of one traced test run
#[derive(Debug, Clone)]
pub struct Trace {
    pub outcome: TestOutcome,
    pub running_time: Duration,
    pub call_tree: CallTree,
}

impl Trace {
    /// Functions the traced test reached, excluding its own entry
    pub fn testees<'a>(
        &self,
        info: &'a InstrumentationInfo,
        entry: &str,
        max_distance: Distance,
    ) -> Vec<(&'a TracedFunction, Distance)> {
        let entry_index = info.index_of(entry).unwrap_or(0);
        self.call_tree
            .testees(entry_index, max_distance)
            .into_iter()
            .filter_map(|(index, distance)| Some((info.function(index)?, distance)))
            .collect()
    }
}

/// Runs tests against an instrumented image and records their call trees
pub struct CallTreeTracer {
    info: InstrumentationInfo,
}

impl CallTreeTracer {
    pub fn new(info: InstrumentationInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &InstrumentationInfo {
        &self.info
    }

    /// Run `test` in place and rebuild its call tree.
    ///
    /// `loader` must hold the instrumented image the tracer was built for.
    pub fn trace(&self, loader: &mut JitLoader, runner: &TestRunner, test: &TestDescriptor) -> Result<Trace> {
        if !loader.is_loaded() {
            return Err(Error::InvalidState("no instrumented image loaded".to_string()));
        }
        loader
            .store_mut()
            .data_mut()
            .begin_trace(self.info.mapping_len());

        let start = Instant::now();
        let outcome = runner.run_test(loader, test);
        let running_time = start.elapsed();

        let mut mapping = loader.store_mut().data_mut().take_mapping();
        let call_tree = CallTree::from_mapping(&mut mapping);

        tracing::debug!(
            test = %test.name,
            status = %outcome.status,
            functions = call_tree.len() - 1,
            "traced test"
        );
        Ok(Trace {
            outcome,
            running_time,
            call_tree,
        })
    }
}
