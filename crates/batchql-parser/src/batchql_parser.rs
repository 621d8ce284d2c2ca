//! batchql parser - from script text to executable batches
//!
//! The pipeline is `Lexer` (text to tokens), `VariableResolver` (`$(name)`
//! substitution) and `BatchBuilder` (tokens to `Script`, expanding `:r`
//! includes and applying the other preprocessor commands).
//!
//! ```ignore
//! use batchql_parser::{BatchBuilder, MemoryIncludeResolver};
//!
//! let builder = BatchBuilder::new(MemoryIncludeResolver::new());
//! let script = builder.build("SELECT 1\nGO\nSELECT 2", [("db", "master")])?;
//! assert_eq!(script.batches.len(), 2);
//! ```

mod builder;
mod include;
pub mod lexer;
mod options;
mod variables;

pub use builder::BatchBuilder;
pub use include::{FsIncludeResolver, MemoryIncludeResolver};
pub use lexer::{Lexer, tokenize};
pub use options::ParserOptions;
pub use variables::{VariableResolver, is_valid_name};
