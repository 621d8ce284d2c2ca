//! Error types for batchql

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SourcePosition, SourceSpan};

/// Server errors at or above this severity fail the batch.
pub const FATAL_SEVERITY: u8 = 11;

/// "Could not find server in sys.servers"; reported with a hint since the
/// usual cause is a missing linked server definition.
const LINKED_SERVER_NOT_FOUND: u32 = 7202;

/// What went wrong while lexing or building a script
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unterminated quoted identifier")]
    UnterminatedIdentifier,

    #[error("unterminated block comment")]
    UnterminatedComment,

    #[error("unknown preprocessor command ':{0}'")]
    UnknownCommand(String),

    #[error("malformed variable reference")]
    MalformedVariableReference,

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("invalid batch repeat count '{0}'")]
    InvalidRepeatCount(String),

    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments {
        command: &'static str,
        reason: String,
    },

    #[error("cannot include '{path}': {reason}")]
    IncludeNotFound { path: String, reason: String },

    #[error("include cycle: '{0}' is already being included")]
    IncludeCycle(String),

    #[error("include depth exceeds the limit of {0}")]
    IncludeDepthExceeded(usize),
}

/// A lexing or build failure, always anchored at a source position
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at {position}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: SourcePosition,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, position: SourcePosition) -> Self {
        Self { kind, position }
    }
}

/// An error raised by the database server while running a batch
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Msg {number}, Level {severity}, State {state}, Line {line}: {message}")]
pub struct BackendError {
    pub number: u32,
    pub severity: u8,
    pub state: u8,
    pub message: String,
    /// 1-based line within the batch text, 0 when the server gave none
    pub line: u32,
    pub procedure: Option<String>,
    pub server: Option<String>,
}

impl BackendError {
    pub fn new(number: u32, severity: u8, message: impl Into<String>) -> Self {
        Self {
            number,
            severity,
            state: 1,
            message: message.into(),
            line: 0,
            procedure: None,
            server: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn with_state(mut self, state: u8) -> Self {
        self.state = state;
        self
    }

    pub fn with_procedure(mut self, procedure: impl Into<String>) -> Self {
        self.procedure = Some(procedure.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity >= FATAL_SEVERITY
    }

    /// Message text for display, with troubleshooting hints for errors that
    /// usually have a configuration cause
    pub fn description(&self) -> String {
        if self.number == LINKED_SERVER_NOT_FOUND {
            format!(
                "{}\nVerify the linked server definition with sp_addlinkedserver or sys.servers.",
                self.message
            )
        } else {
            self.message.clone()
        }
    }
}

/// Errors surfaced by an execution backend
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection broken: {0}")]
    ConnectionBroken(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(BackendError),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// True when the session that produced this error can no longer be used
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionBroken(_) | Self::Io(_) | Self::Timeout(_) | Self::Connection(_)
        )
    }
}

/// Failures reading an included file
#[derive(Error, Debug)]
pub enum IncludeError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a script run
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Connection error: {0}")]
    Connection(#[source] DriverError),

    #[error("Internal error in batch {batch} ({span}) while {state}: {message}")]
    Internal {
        message: String,
        batch: usize,
        span: SourceSpan,
        state: String,
    },

    #[error("Event receiver dropped")]
    EventChannelClosed,
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
