//! Batches and the parsed script that holds them

use serde::{Deserialize, Serialize};

use crate::{SourceFile, SourcePosition, SourceSpan};

/// What the engine does when a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAction {
    /// Stop the run (`:on error exit`)
    #[default]
    Exit,
    /// Report the failure and continue with the next batch (`:on error ignore`)
    Ignore,
}

impl ErrorAction {
    /// Parse the argument of an `:on error` directive
    pub fn from_argument(arg: &str) -> Option<Self> {
        match arg.trim().to_ascii_lowercase().as_str() {
            "exit" => Some(Self::Exit),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub fn halts(&self) -> bool {
        matches!(self, Self::Exit)
    }
}

/// Maps each line of a batch's text back to where that line starts in the
/// source, so server-reported line numbers can be shown in script
/// coordinates even when the batch spans include boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineMap {
    starts: Vec<SourcePosition>,
}

impl LineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the source position of the next batch line
    pub fn push(&mut self, start: SourcePosition) {
        self.starts.push(start);
    }

    /// Source position of 1-based batch `line`
    pub fn get(&self, line: u32) -> Option<&SourcePosition> {
        let index = (line as usize).checked_sub(1)?;
        self.starts.get(index)
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn clear(&mut self) {
        self.starts.clear();
    }
}

/// A contiguous, substituted, separator-free chunk of script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 0-based position of this batch in the script
    pub index: usize,
    /// Text sent to the backend, with variables already substituted
    pub text: String,
    pub start: SourcePosition,
    pub end: SourcePosition,
    /// How many times the batch runs; always at least 1
    pub repeat: u32,
    /// Error-handling mode in force when the batch was closed
    pub error_action: ErrorAction,
    /// Server named by the most recent `:connect`, if any
    pub connect_target: Option<String>,
    /// Messages produced by `:list`/`:listvar` before this batch
    pub preamble: Vec<String>,
    pub line_map: LineMap,
}

impl Batch {
    pub fn source_file(&self) -> &SourceFile {
        &self.start.file
    }

    /// Whitespace-only batches keep their place in the script so spans and
    /// separators still rebuild the source, but are never sent.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn span(&self) -> SourceSpan {
        SourceSpan::new(self.start.clone(), self.end.clone())
    }

    /// Translate a backend-reported line number (1-based, relative to the
    /// batch text) into a script position.
    pub fn map_line(&self, line: u32) -> Option<SourcePosition> {
        self.line_map.get(line).cloned()
    }
}

/// Destinations named by `:out`, `:error` and `:perftrace`.
///
/// Values are recorded verbatim (`stdout`, `stderr` or a path); writing to
/// them is up to the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputTargets {
    pub out: Option<String>,
    pub error: Option<String>,
    pub perftrace: Option<String>,
}

/// The result of building a script: ordered batches plus script-level
/// side effects of preprocessor commands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub batches: Vec<Batch>,
    /// `:list`/`:listvar` output that was not followed by another batch
    pub trailing_messages: Vec<String>,
    pub output_targets: OutputTargets,
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of executions once repeat counts are expanded. Blank batches
    /// are not executed.
    pub fn instance_count(&self) -> u64 {
        self.batches
            .iter()
            .filter(|b| !b.is_blank())
            .map(|b| u64::from(b.repeat))
            .sum()
    }
}
