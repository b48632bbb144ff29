//! Core types and utilities shared by every crate of the mutjit mutation testing engine.

pub mod types;
pub mod config;
pub mod error;
pub mod summary;

pub use error::{Error, Result};
pub use types::*;
pub use config::*;
pub use summary::*;
