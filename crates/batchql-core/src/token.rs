//! Lexical tokens produced from script text

use std::fmt;

use crate::SourcePosition;

/// Preprocessor commands understood by the batch builder.
///
/// Command names are matched case-insensitively after the leading `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `:setvar name [value]`
    SetVar,
    /// `:r path`
    Include,
    /// `:on error exit|ignore`
    OnError,
    /// `:connect server[,port] [options]`
    Connect,
    /// `:list` - echo the pending batch
    List,
    /// `:listvar` - echo the variable table
    ListVar,
    /// `:perftrace target`
    PerfTrace,
    /// `:out target`
    Out,
    /// `:error target`
    Error,
    /// `:reset` - discard the pending batch
    Reset,
    /// `:quit` - stop without running the pending batch
    Quit,
    /// `:exit` - run the pending batch, then stop
    Exit,
}

impl CommandKind {
    /// Look up a single-word command name. `on error` is two words and is
    /// recognized by the lexer directly.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "setvar" => Self::SetVar,
            "r" => Self::Include,
            "connect" => Self::Connect,
            "list" => Self::List,
            "listvar" => Self::ListVar,
            "perftrace" => Self::PerfTrace,
            "out" => Self::Out,
            "error" => Self::Error,
            "reset" => Self::Reset,
            "quit" => Self::Quit,
            "exit" => Self::Exit,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical spelling, without the leading colon
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetVar => "setvar",
            Self::Include => "r",
            Self::OnError => "on error",
            Self::Connect => "connect",
            Self::List => "list",
            Self::ListVar => "listvar",
            Self::PerfTrace => "perftrace",
            Self::Out => "out",
            Self::Error => "error",
            Self::Reset => "reset",
            Self::Quit => "quit",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.name())
    }
}

/// A preprocessor command line with its raw argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessorCommand {
    pub kind: CommandKind,
    /// Everything after the command name, trimmed
    pub arguments: String,
    /// Position of the first argument character (or of the line end when
    /// there are no arguments)
    pub arguments_start: SourcePosition,
}

/// Classification of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Ordinary script text, including whitespace and newlines
    Text,
    /// A single-quoted literal, quotes included
    QuotedString,
    /// A `[bracketed]` or `"double-quoted"` identifier, delimiters included
    QuotedIdentifier,
    /// `-- ...` up to, not including, the newline
    LineComment,
    /// `/* ... */`, possibly nested
    BlockComment,
    /// A `GO` line; `repeat` is 1 when no count was given
    BatchSeparator { repeat: u32 },
    /// A `:command` line
    Command(PreprocessorCommand),
    /// `$(name)`
    VariableReference { name: String },
}

/// A classified slice of source text with its coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source text of the token
    pub text: String,
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl Token {
    pub fn new(kind: TokenKind, text: String, start: SourcePosition, end: SourcePosition) -> Self {
        Self {
            kind,
            text,
            start,
            end,
        }
    }

    /// True for tokens whose text is passed through to the batch unchanged
    pub fn is_literal_text(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Text
                | TokenKind::QuotedString
                | TokenKind::QuotedIdentifier
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }

    pub fn is_separator(&self) -> bool {
        matches!(self.kind, TokenKind::BatchSeparator { .. })
    }
}
