//! batchql core - shared types and capability traits
//!
//! This crate defines what the other batchql crates exchange:
//!
//! - `SourcePosition`/`SourceSpan` - file-aware line and column coordinates
//! - `Token` - classified lexical tokens
//! - `Batch`/`Script` - the output of the batch builder
//! - `Backend`/`Session` - the execution backend capability
//! - `IncludeResolver` - how `:r` directives read files
//! - the error taxonomy (`ParseError`, `DriverError`, `ExecutionError`)

mod backend;
mod batch;
mod error;
mod include;
mod position;
mod result;
mod token;

pub use backend::*;
pub use batch::*;
pub use error::*;
pub use include::*;
pub use position::*;
pub use result::*;
pub use token::*;
