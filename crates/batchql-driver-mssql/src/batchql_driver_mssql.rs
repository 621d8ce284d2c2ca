//! SQL Server backend for batchql
//!
//! Opens sessions with tiberius over TCP and runs each batch as a single
//! request. Row counts are reported as `(N rows affected)` messages, and
//! server errors carry their number, severity and line so the engine can map
//! them back to the script.

mod backend;
mod config;
mod error;
mod session;

#[cfg(test)]
mod backend_tests;
#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod error_tests;
#[cfg(test)]
mod session_tests;

pub use backend::MssqlBackend;
pub use config::{MssqlConfig, ServerAddress};
pub use session::MssqlSession;
