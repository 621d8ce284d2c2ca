//! Events emitted while a script runs

use std::fmt;
use std::time::Duration;

use batchql_core::{BackendError, ExecutionResult, SourcePosition, SourceSpan};
use uuid::Uuid;

/// Where the engine is in a run.
///
/// `Dispatching`, `Awaiting` and `Reporting` repeat for every batch
/// instance; the last three states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    /// Acquiring a session and submitting the batch
    Dispatching,
    /// Waiting for the backend to finish the batch
    Awaiting,
    /// Classifying the result and emitting its events
    Reporting,
    Completed,
    Halted,
    Cancelled,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Halted | Self::Cancelled)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Dispatching => "dispatching",
            Self::Awaiting => "awaiting",
            Self::Reporting => "reporting",
            Self::Completed => "completed",
            Self::Halted => "halted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: EngineState,
    /// Batch instances that ran to completion, repeats counted separately
    pub batches_executed: usize,
    pub batches_failed: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: EngineState::Idle,
            batches_executed: 0,
            batches_failed: 0,
            elapsed: Duration::ZERO,
        }
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// An error surfaced while a batch ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedError {
    /// Raised by the server. `position` is the script location of the line
    /// the server blamed, or the batch start when it gave no line.
    Backend {
        error: BackendError,
        position: SourcePosition,
    },
    /// The session failed below the server level
    Driver { message: String },
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { error, position } => write!(f, "{} ({})", error, position),
            Self::Driver { message } => f.write_str(message),
        }
    }
}

/// Everything a caller can observe about a run, in emission order.
///
/// Every batch instance that starts ends with either `BatchCompleted` or
/// one of the terminal script events; exactly one terminal script event
/// ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    BatchStarted {
        batch: usize,
        /// 1-based repetition of this batch
        repeat: u32,
        repeat_count: u32,
        span: SourceSpan,
    },
    /// Informational output; `batch` is `None` for script-level output
    Message {
        batch: Option<usize>,
        message: String,
    },
    Error {
        batch: usize,
        repeat: u32,
        error: ReportedError,
    },
    BatchCompleted {
        batch: usize,
        repeat: u32,
        result: ExecutionResult,
    },
    ScriptCompleted {
        summary: RunSummary,
    },
    ScriptHalted {
        batch: Option<usize>,
        reason: String,
    },
    ScriptCancelled {
        batch: Option<usize>,
    },
}

impl ExecutionEvent {
    /// True for the events that end a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ScriptCompleted { .. } | Self::ScriptHalted { .. } | Self::ScriptCancelled { .. }
        )
    }
}
