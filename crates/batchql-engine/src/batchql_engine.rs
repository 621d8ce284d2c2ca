//! batchql engine - runs built scripts against a backend
//!
//! `ExecutionEngine::run` executes the batches of a `Script` strictly in
//! order, repeating each as many times as its separator asked for, and
//! reports everything that happens as `ExecutionEvent`s on a channel the
//! caller drains. Session acquisition and transient batch failures go
//! through the retry policy from `batchql-connection`.

mod config;
mod engine;
mod event;
mod session;

pub use config::{ConfigError, EngineConfig};
pub use engine::ExecutionEngine;
pub use event::{EngineState, ExecutionEvent, ReportedError, RunSummary};
