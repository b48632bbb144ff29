//! Symbol resolvers consulted by the loader while linking an image.
//!
//! Resolution goes through a [`ResolverChain`], first match wins:
//! runtime overrides, then host process symbols, then synthetic symbols
//! (trampoline cells or instrumentation hooks).

use crate::natives::NativeSymbol;
use mutjit_core::{Error, Result};
use wasmtime::Global;

/// What a symbol name resolves to
#[derive(Debug, Clone)]
pub enum SymbolDefinition {
    /// Address of a function already in the image's table
    Address(u64),
    /// Host function, placed into the image's table on first use
    Native(NativeSymbol),
    /// Mutable cell owned by the resolver
    Cell(Global),
    /// Plain integer value
    Constant(i32),
}

/// A source of symbol definitions. Must be a pure function of the name.
pub trait SymbolResolver {
    fn find_symbol(&self, name: &str) -> Option<SymbolDefinition>;
}

/// Runtime functions the engine emulates instead of using the host's.
///
/// These shadow host symbols of the same name: the real `exit` would end
/// the worker and the real `atexit` cannot call back into JIT code.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeOverrides;

impl SymbolResolver for RuntimeOverrides {
    fn find_symbol(&self, name: &str) -> Option<SymbolDefinition> {
        let native = match name {
            "exit" => NativeSymbol::EmulatedExit,
            "atexit" => NativeSymbol::EmulatedAtExit,
            "__cxa_atexit" => NativeSymbol::EmulatedCxaAtExit,
            _ => return None,
        };
        Some(SymbolDefinition::Native(native))
    }
}

/// Functions provided by the host process itself
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProcessSymbols;

impl SymbolResolver for HostProcessSymbols {
    fn find_symbol(&self, name: &str) -> Option<SymbolDefinition> {
        let native = match name {
            "exit" => NativeSymbol::ProcessExit,
            "atexit" => NativeSymbol::ProcessAtExit,
            "abort" => NativeSymbol::Abort,
            "putchar" => NativeSymbol::PutChar,
            "print_i32" => NativeSymbol::PrintI32,
            _ => return None,
        };
        Some(SymbolDefinition::Native(native))
    }
}

/// Ordered resolvers, first match wins
#[derive(Default)]
pub struct ResolverChain<'a> {
    resolvers: Vec<&'a dyn SymbolResolver>,
}

impl<'a> ResolverChain<'a> {
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    pub fn with(mut self, resolver: &'a dyn SymbolResolver) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Result<SymbolDefinition> {
        self.find_symbol(name)
            .ok_or_else(|| Error::SymbolNotFound(name.to_string()))
    }
}

impl SymbolResolver for ResolverChain<'_> {
    fn find_symbol(&self, name: &str) -> Option<SymbolDefinition> {
        self.resolvers.iter().find_map(|r| r.find_symbol(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, i32);

    impl SymbolResolver for Fixed {
        fn find_symbol(&self, name: &str) -> Option<SymbolDefinition> {
            (name == self.0).then_some(SymbolDefinition::Constant(self.1))
        }
    }

    #[test]
    fn test_overrides_shadow_host_symbols() {
        let chain = ResolverChain::new()
            .with(&RuntimeOverrides)
            .with(&HostProcessSymbols);

        assert!(matches!(
            chain.resolve("exit"),
            Ok(SymbolDefinition::Native(NativeSymbol::EmulatedExit))
        ));
        assert!(matches!(
            chain.resolve("putchar"),
            Ok(SymbolDefinition::Native(NativeSymbol::PutChar))
        ));

        let host_only = ResolverChain::new().with(&HostProcessSymbols);
        assert!(matches!(
            host_only.resolve("exit"),
            Ok(SymbolDefinition::Native(NativeSymbol::ProcessExit))
        ));
    }

    #[test]
    fn test_first_match_wins() {
        let first = Fixed("x", 1);
        let second = Fixed("x", 2);
        let chain = ResolverChain::new().with(&first).with(&second);
        assert!(matches!(chain.resolve("x"), Ok(SymbolDefinition::Constant(1))));
    }

    #[test]
    fn test_unresolved_symbol() {
        let chain = ResolverChain::new().with(&RuntimeOverrides);
        match chain.resolve("count_letters") {
            Err(Error::SymbolNotFound(name)) => assert_eq!(name, "count_letters"),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }
}
