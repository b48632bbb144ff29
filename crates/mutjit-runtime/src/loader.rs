//! Loading object files into one linked program image.

use crate::context::ImageState;
use crate::natives::NativeSymbol;
use crate::resolver::{SymbolDefinition, SymbolResolver};
use crate::ObjectFile;
use mutjit_core::{Error, Result};
use mutjit_ir::naming;
use std::collections::HashMap;
use std::time::Duration;
use wasmtime::*;

/// Epoch deadline of a store with no armed timeout
const NO_DEADLINE: u64 = u64::MAX / 2;

fn fresh_store(engine: &Engine) -> Store<ImageState> {
    let mut store = Store::new(engine, ImageState::new());
    store.set_epoch_deadline(NO_DEADLINE);
    store
}

/// The currently loaded image: shared memory and table plus the symbol table
struct Image {
    memory: Memory,
    table: Table,
    instances: Vec<Instance>,
    symbols: HashMap<String, u64>,
    native_funcs: HashMap<NativeSymbol, Func>,
    native_addresses: HashMap<NativeSymbol, u64>,
    constructors: Vec<u64>,
}

impl Image {
    fn native_func(&mut self, store: &mut Store<ImageState>, native: NativeSymbol) -> Func {
        *self
            .native_funcs
            .entry(native)
            .or_insert_with(|| native.create(store))
    }

    fn native_address(&mut self, store: &mut Store<ImageState>, native: NativeSymbol) -> Result<u64> {
        if let Some(address) = self.native_addresses.get(&native) {
            return Ok(*address);
        }
        let func = self.native_func(store, native);
        let address = self
            .table
            .grow(&mut *store, 1, Ref::Func(Some(func)))
            .map_err(|e| Error::Wasm(format!("Failed to grow table: {}", e)))?;
        self.native_addresses.insert(native, address as u64);
        Ok(address as u64)
    }
}

/// Links object files into a single image and answers address queries.
///
/// A loader holds at most one image, and every image lives in a store of
/// its own: releasing the image drops the store with its memory, table,
/// instances and cells. Cells meant for an image (trampolines) are
/// allocated in the current store before `load`. Addresses are slots of
/// the image's indirect call table; slot 0 is never a function.
pub struct JitLoader {
    engine: Engine,
    store: Store<ImageState>,
    generation: u64,
    memory_pages: u32,
    image: Option<Image>,
}

impl JitLoader {
    pub fn new(engine: &Engine, memory_pages: u32) -> Self {
        Self {
            engine: engine.clone(),
            store: fresh_store(engine),
            generation: 0,
            memory_pages,
            image: None,
        }
    }

    /// Link `objects` into a fresh image, resolving what they do not define
    /// through `resolver`. A previously loaded image is released first; a
    /// failed load leaves the loader empty with a fresh store.
    pub fn load(&mut self, objects: &[ObjectFile], resolver: &dyn SymbolResolver) -> Result<()> {
        if self.image.is_some() {
            self.unload();
        }
        self.store.data_mut().reset_run();

        match self.link(objects, resolver) {
            Ok(image) => {
                tracing::debug!(
                    objects = objects.len(),
                    symbols = image.symbols.len(),
                    natives = image.native_funcs.len(),
                    generation = self.generation,
                    "loaded image"
                );
                self.image = Some(image);
                Ok(())
            }
            Err(e) => {
                self.unload();
                Err(e)
            }
        }
    }

    fn link(&mut self, objects: &[ObjectFile], resolver: &dyn SymbolResolver) -> Result<Image> {
        let memory = Memory::new(&mut self.store, MemoryType::new(self.memory_pages, None))
            .map_err(|e| Error::Wasm(format!("Failed to create memory: {}", e)))?;
        let table = Table::new(
            &mut self.store,
            TableType::new(RefType::FUNCREF, 1, None),
            Ref::Func(None),
        )
        .map_err(|e| Error::Wasm(format!("Failed to create table: {}", e)))?;

        let mut image = Image {
            memory,
            table,
            instances: Vec::with_capacity(objects.len()),
            symbols: HashMap::new(),
            native_funcs: HashMap::new(),
            native_addresses: HashMap::new(),
            constructors: Vec::new(),
        };

        // Addresses are assigned up front so objects can refer to each other
        let total: usize = objects.iter().map(|o| o.defined.len()).sum();
        let base = image
            .table
            .grow(&mut self.store, total as u32, Ref::Func(None))
            .map_err(|e| Error::Wasm(format!("Failed to grow table: {}", e)))? as u64;
        let mut next = base;
        for object in objects {
            for name in &object.defined {
                if image.symbols.insert(name.clone(), next).is_some() {
                    return Err(Error::Link(format!(
                        "duplicate symbol '{}' in {}",
                        name, object.module_id
                    )));
                }
                next += 1;
            }
        }

        for object in objects {
            let imports = link_imports(&mut self.store, &mut image, object, resolver)?;
            let instance = Instance::new(&mut self.store, &object.module, &imports)
                .map_err(|e| Error::Link(format!("{}: {}", object.module_id, e)))?;

            for name in &object.defined {
                let func = instance.get_func(&mut self.store, name).ok_or_else(|| {
                    Error::Link(format!("{} does not export '{}'", object.module_id, name))
                })?;
                let address = image.symbols[name];
                image
                    .table
                    .set(&mut self.store, address as u32, Ref::Func(Some(func)))
                    .map_err(|e| Error::Wasm(format!("Failed to set table slot: {}", e)))?;
            }
            for ctor in &object.constructors {
                let address = image.symbols.get(ctor).copied().ok_or_else(|| {
                    Error::Link(format!("constructor '{}' is not defined", ctor))
                })?;
                image.constructors.push(address);
            }
            image.instances.push(instance);
        }

        Ok(image)
    }

    /// Release the current image together with its store
    pub fn unload(&mut self) {
        self.image = None;
        self.store = fresh_store(&self.engine);
        self.generation += 1;
    }

    /// Identifies the current store; changes whenever an image is released
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Arm a wall-clock limit for the next calls into the image.
    ///
    /// The limit counts from now and only advances while an
    /// [`EpochTicker`](crate::EpochTicker) runs; a call past it traps.
    /// `None` disarms it.
    pub fn set_deadline(&mut self, timeout: Option<Duration>) {
        let ticks = timeout.map(crate::deadline::ticks_for).unwrap_or(NO_DEADLINE);
        self.store.set_epoch_deadline(ticks);
    }

    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// Address of a symbol defined by the loaded object files
    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.image.as_ref()?.symbols.get(name).copied()
    }

    /// Function stored at `address`
    pub fn function_at(&mut self, address: u64) -> Option<Func> {
        let table = self.image.as_ref()?.table;
        let index = u32::try_from(address).ok()?;
        match table.get(&mut self.store, index) {
            Some(Ref::Func(Some(func))) => Some(func),
            _ => None,
        }
    }

    /// Function defined under `name`
    pub fn function(&mut self, name: &str) -> Option<Func> {
        let address = self.address_of(name)?;
        self.function_at(address)
    }

    /// Addresses of static constructors, in object then declaration order
    pub fn constructors(&self) -> Vec<u64> {
        self.image
            .as_ref()
            .map(|i| i.constructors.clone())
            .unwrap_or_default()
    }

    pub fn memory(&self) -> Option<Memory> {
        self.image.as_ref().map(|i| i.memory)
    }

    pub fn symbol_count(&self) -> usize {
        self.image.as_ref().map(|i| i.symbols.len()).unwrap_or(0)
    }

    pub fn store(&self) -> &Store<ImageState> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<ImageState> {
        &mut self.store
    }
}

fn constant_global(store: &mut Store<ImageState>, value: i32) -> Result<Extern> {
    let global = Global::new(
        &mut *store,
        GlobalType::new(ValType::I32, Mutability::Const),
        Val::I32(value),
    )
    .map_err(|e| Error::Wasm(format!("Failed to create global: {}", e)))?;
    Ok(Extern::Global(global))
}

fn address_value(name: &str, address: u64) -> Result<i32> {
    u32::try_from(address)
        .map(|a| a as i32)
        .map_err(|_| Error::Link(format!("address of '{}' out of range: {}", name, address)))
}

/// Build the import list of one object against the image and the resolver
fn link_imports(
    store: &mut Store<ImageState>,
    image: &mut Image,
    object: &ObjectFile,
    resolver: &dyn SymbolResolver,
) -> Result<Vec<Extern>> {
    let mut externs = Vec::new();

    for import in object.module.imports() {
        let name = import.name();
        let linked = match (import.module(), import.ty()) {
            (naming::ENV_MODULE, ExternType::Memory(_)) if name == naming::MEMORY_SYMBOL => {
                Extern::Memory(image.memory)
            }
            (naming::ENV_MODULE, ExternType::Table(_)) if name == naming::TABLE_SYMBOL => {
                Extern::Table(image.table)
            }
            (naming::GOT_MODULE, ExternType::Global(_)) => {
                let address = match image.symbols.get(name) {
                    Some(address) => *address,
                    None => match resolver.find_symbol(name) {
                        Some(SymbolDefinition::Address(address)) => address,
                        Some(SymbolDefinition::Native(native)) => {
                            if let Some(expected) = object.expected_signature(name) {
                                if expected != native.signature() {
                                    return Err(Error::Link(format!(
                                        "{} calls '{}' as {:?}, host provides {:?}",
                                        object.module_id,
                                        name,
                                        expected,
                                        native.signature()
                                    )));
                                }
                            }
                            image.native_address(store, native)?
                        }
                        Some(other) => {
                            return Err(Error::Link(format!(
                                "'{}' is not a function: {:?}",
                                name, other
                            )))
                        }
                        None => return Err(Error::SymbolNotFound(name.to_string())),
                    },
                };
                constant_global(store, address_value(name, address)?)?
            }
            (_, ExternType::Global(ty)) => match (ty.mutability(), resolver.find_symbol(name)) {
                (Mutability::Var, Some(SymbolDefinition::Cell(cell))) => Extern::Global(cell),
                (Mutability::Const, Some(SymbolDefinition::Constant(value))) => {
                    constant_global(store, value)?
                }
                (Mutability::Const, Some(SymbolDefinition::Address(address))) => {
                    constant_global(store, address_value(name, address)?)?
                }
                (_, None) => return Err(Error::SymbolNotFound(name.to_string())),
                (_, Some(other)) => {
                    return Err(Error::Link(format!(
                        "cannot bind {:?} to global '{}'",
                        other, name
                    )))
                }
            },
            (_, ExternType::Func(_)) => match resolver.find_symbol(name) {
                Some(SymbolDefinition::Native(native)) => {
                    Extern::Func(image.native_func(store, native))
                }
                Some(other) => {
                    return Err(Error::Link(format!(
                        "cannot bind {:?} to function import '{}'",
                        other, name
                    )))
                }
                None => return Err(Error::SymbolNotFound(name.to_string())),
            },
            (module, _) => {
                return Err(Error::Link(format!(
                    "unsupported import {}.{} in {}",
                    module, name, object.module_id
                )))
            }
        };
        externs.push(linked);
    }

    Ok(externs)
}
