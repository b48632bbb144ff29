//! Trampoline cells: one mutable address per mutated function.
//!
//! A mutated function's stub calls through its cell, so switching the
//! active mutant is a single store into the cell. Cells are allocated in
//! the loader's store before the image that imports them is loaded, and
//! are released with that image: once the loader drops the store, every
//! operation on the table fails with `InvalidState`.

use crate::loader::JitLoader;
use crate::resolver::{SymbolDefinition, SymbolResolver};
use mutjit_core::{Error, Result};
use mutjit_ir::naming;
use std::collections::BTreeMap;
use wasmtime::*;

#[derive(Debug, Default)]
pub struct TrampolineTable {
    cells: BTreeMap<String, Global>,
    /// Loader generation the cells were allocated in
    generation: Option<u64>,
}

impl TrampolineTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_live(&self, loader: &JitLoader) -> Result<()> {
        match self.generation {
            Some(generation) if generation != loader.generation() => Err(Error::InvalidState(
                "trampoline cells belong to a released image".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Allocate a zeroed cell for every key not already present
    pub fn allocate(&mut self, loader: &mut JitLoader, keys: &[String]) -> Result<()> {
        self.check_live(loader)?;
        self.generation = Some(loader.generation());
        for key in keys {
            if self.cells.contains_key(key) {
                continue;
            }
            let cell = Global::new(
                loader.store_mut(),
                GlobalType::new(ValType::I32, Mutability::Var),
                Val::I32(0),
            )
            .map_err(|e| Error::Wasm(format!("Failed to allocate trampoline {}: {}", key, e)))?;
            self.cells.insert(key.clone(), cell);
        }
        Ok(())
    }

    /// The cell owned by `key`
    pub fn pointer_for(&self, key: &str) -> Result<Global> {
        self.cells
            .get(key)
            .copied()
            .ok_or_else(|| Error::UnknownSymbol(key.to_string()))
    }

    /// Point `key` at the function stored at `address`
    pub fn bind(&self, loader: &mut JitLoader, key: &str, address: u64) -> Result<()> {
        let cell = self.pointer_for(key)?;
        self.check_live(loader)?;
        let value = u32::try_from(address)
            .map_err(|_| Error::InvalidState(format!("address out of range: {}", address)))?;
        cell.set(loader.store_mut(), Val::I32(value as i32))
            .map_err(|e| Error::Wasm(format!("Failed to bind trampoline {}: {}", key, e)))
    }

    /// Current address held by `key`
    pub fn value(&self, loader: &mut JitLoader, key: &str) -> Result<u64> {
        let cell = self.pointer_for(key)?;
        self.check_live(loader)?;
        cell.get(loader.store_mut())
            .i32()
            .map(|v| v as u32 as u64)
            .ok_or_else(|| Error::InvalidState(format!("trampoline {} is not an i32", key)))
    }

    /// Point every cell at the preserved original body of its function
    pub fn bind_originals(&self, loader: &mut JitLoader) -> Result<()> {
        for key in self.cells.keys() {
            let original = naming::original_symbol(key);
            let address = loader
                .address_of(&original)
                .ok_or_else(|| Error::NotFound(original.clone()))?;
            self.bind(loader, key, address)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl SymbolResolver for TrampolineTable {
    fn find_symbol(&self, name: &str) -> Option<SymbolDefinition> {
        let key = naming::trampoline_key_of(name)?;
        self.cells.get(key).map(|cell| SymbolDefinition::Cell(*cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolverChain, RuntimeOverrides};
    use crate::testing::{sum_program, sum_test_program};
    use crate::Runtime;
    use mutjit_core::ExecutionConfig;

    fn runtime() -> Runtime {
        Runtime::new(ExecutionConfig::default()).unwrap()
    }

    #[test]
    fn test_allocate_and_bind() {
        let runtime = runtime();
        let mut loader = runtime.loader();
        let mut table = TrampolineTable::new();
        let keys = vec!["sum_m0".to_string(), "neg_m0".to_string()];

        table.allocate(&mut loader, &keys).unwrap();
        let first = table.pointer_for("sum_m0").unwrap();
        // allocating again keeps existing cells
        table.allocate(&mut loader, &keys).unwrap();
        assert_eq!(table.len(), 2);

        assert_eq!(table.value(&mut loader, "sum_m0").unwrap(), 0);
        table.bind(&mut loader, "sum_m0", 7).unwrap();
        assert_eq!(table.value(&mut loader, "sum_m0").unwrap(), 7);
        assert_eq!(first.get(loader.store_mut()).i32(), Some(7));
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["neg_m0", "sum_m0"]);
    }

    #[test]
    fn test_unknown_key() {
        let runtime = runtime();
        let mut loader = runtime.loader();
        let table = TrampolineTable::new();

        assert!(matches!(table.pointer_for("f_m"), Err(Error::UnknownSymbol(_))));
        assert!(matches!(table.bind(&mut loader, "f_m", 1), Err(Error::UnknownSymbol(_))));
    }

    #[test]
    fn test_resolves_trampoline_symbols() {
        let runtime = runtime();
        let mut loader = runtime.loader();
        let mut table = TrampolineTable::new();
        table.allocate(&mut loader, &["sum_m0".to_string()]).unwrap();

        assert!(matches!(
            table.find_symbol("sum_m0_trampoline"),
            Some(SymbolDefinition::Cell(_))
        ));
        assert!(table.find_symbol("sum_m0").is_none());
        assert!(table.find_symbol("other_trampoline").is_none());
    }

    #[test]
    fn test_cells_die_with_their_image() {
        let runtime = runtime();
        let objects = vec![
            runtime.compile(&sum_program(), "sum_00", false).unwrap(),
            runtime.compile(&sum_test_program(), "sum_test_00", false).unwrap(),
        ];
        let mut loader = runtime.loader();
        let mut table = TrampolineTable::new();
        table.allocate(&mut loader, &["sum_m0".to_string()]).unwrap();

        let chain = ResolverChain::new().with(&RuntimeOverrides).with(&table);
        loader.load(&objects, &chain).unwrap();
        let sum = loader.address_of("sum").unwrap();
        table.bind(&mut loader, "sum_m0", sum).unwrap();

        loader.load(&objects, &RuntimeOverrides).unwrap();
        assert!(matches!(
            table.bind(&mut loader, "sum_m0", sum),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(table.value(&mut loader, "sum_m0"), Err(Error::InvalidState(_))));
        assert!(matches!(
            table.allocate(&mut loader, &["neg_m0".to_string()]),
            Err(Error::InvalidState(_))
        ));

        // a new table works against the new store
        let mut fresh = TrampolineTable::new();
        fresh.allocate(&mut loader, &["sum_m0".to_string()]).unwrap();
        fresh.bind(&mut loader, "sum_m0", sum).unwrap();
        assert_eq!(fresh.value(&mut loader, "sum_m0").unwrap(), sum);
    }
}
