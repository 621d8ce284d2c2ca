//! Source coordinates for tokens, batches and errors
//!
//! Every position is expressed in the coordinates of the file it was read
//! from. Text lexed from an included file keeps that file's line and column
//! numbers, so an editor can point at the exact spot in the right file.

use std::fmt;
use std::sync::Arc;

/// Identifies the text a position belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SourceFile {
    /// The top-level script handed to the builder
    #[default]
    Script,
    /// A file pulled in by an include directive, keyed by its resolved path
    Include(Arc<str>),
}

impl SourceFile {
    /// Create a tag for an included file
    pub fn include(path: impl AsRef<str>) -> Self {
        Self::Include(Arc::from(path.as_ref()))
    }

    /// The resolved path of an included file, `None` for the top-level script
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Script => None,
            Self::Include(path) => Some(path),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Self::Script)
    }
}

impl fmt::Display for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "<script>"),
            Self::Include(path) => write!(f, "{}", path),
        }
    }
}

/// A point in a source file.
///
/// `line` and `column` are 1-based; columns count characters, not bytes.
/// `offset` is the byte offset from the start of the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub file: SourceFile,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl SourcePosition {
    pub fn new(file: SourceFile, line: u32, column: u32, offset: usize) -> Self {
        Self {
            file,
            line,
            column,
            offset,
        }
    }

    /// The first character of `file`
    pub fn start_of(file: SourceFile) -> Self {
        Self::new(file, 1, 1, 0)
    }

    /// Same file, line and column without the byte offset, handy for assertions
    pub fn line_column(&self) -> (u32, u32) {
        (self.line, self.column)
    }
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::start_of(SourceFile::Script)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A half-open region of source text, `start` inclusive and `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceSpan {
    pub fn new(start: SourcePosition, end: SourcePosition) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.file == self.end.file {
            write!(
                f,
                "{}:{}:{}-{}:{}",
                self.start.file,
                self.start.line,
                self.start.column,
                self.end.line,
                self.end.column
            )
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
