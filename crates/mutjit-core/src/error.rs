//! Error types for the engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("WASM error: {0}")]
    Wasm(String),

    /// A trampoline was requested for a name that was never allocated.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// No resolver in the chain could provide the symbol.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Mutation error: {0}")]
    Mutation(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Errors raised while binding an object set together.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Error::SymbolNotFound(_) | Error::Link(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
