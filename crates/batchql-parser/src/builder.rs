//! Batch builder
//!
//! Walks the token stream in document order and assembles batches. Variable
//! assignments, includes and mode changes take effect at the point they
//! appear, so later batches see earlier assignments and never the reverse.

use batchql_core::{
    Batch, CommandKind, ErrorAction, IncludeResolver, LineMap, OutputTargets, ParseError,
    ParseErrorKind, PreprocessorCommand, Script, SourceFile, SourcePosition, Token, TokenKind,
};

use crate::lexer::Lexer;
use crate::options::ParserOptions;
use crate::variables::{VariableResolver, is_valid_name};


/// Whether the walk should keep going after a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// `:quit` or `:exit` ended the script
    Stop,
}

/// Text collected for the batch currently being built
#[derive(Debug, Default)]
struct PendingBatch {
    text: String,
    start: Option<SourcePosition>,
    end: Option<SourcePosition>,
    line_map: LineMap,
    /// A newline was appended and the next line has no characters yet
    at_line_start: bool,
    /// Text is still on the line of the separator that opened this batch
    on_separator_line: bool,
    /// Where the first appended text began, even if it was on the
    /// separator line
    first: Option<SourcePosition>,
}

impl PendingBatch {
    /// Append token text. `exact` is false for substituted values, whose
    /// characters have no position of their own; any line they start maps
    /// back to the reference.
    fn append(&mut self, text: &str, start: &SourcePosition, end: &SourcePosition, exact: bool) {
        if text.is_empty() {
            return;
        }
        if self.first.is_none() {
            self.first = Some(start.clone());
        }

        let mut position = start.clone();
        for c in text.chars() {
            if self.start.is_none() && !self.on_separator_line {
                self.start = Some(if exact {
                    position.clone()
                } else {
                    start.clone()
                });
            }
            if self.at_line_start || self.line_map.is_empty() {
                self.line_map.push(if exact {
                    position.clone()
                } else {
                    start.clone()
                });
                self.at_line_start = false;
            }
            self.text.push(c);
            if exact {
                position.offset += c.len_utf8();
                if c == '\n' {
                    position.line += 1;
                    position.column = 1;
                } else {
                    position.column += 1;
                }
            }
            if c == '\n' {
                self.at_line_start = true;
                self.on_separator_line = false;
            }
        }
        self.end = Some(end.clone());
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

struct BuildState<'o> {
    options: &'o ParserOptions,
    variables: VariableResolver,
    pending: PendingBatch,
    batches: Vec<Batch>,
    /// Pushed by `:on error`; the top entry applies to batches closed now
    mode_stack: Vec<ErrorAction>,
    connect_target: Option<String>,
    preamble: Vec<String>,
    output_targets: OutputTargets,
    /// Files currently being expanded, innermost last
    include_stack: Vec<String>,
}

impl<'o> BuildState<'o> {
    fn new(options: &'o ParserOptions, variables: VariableResolver) -> Self {
        Self {
            options,
            variables,
            pending: PendingBatch::default(),
            batches: Vec::new(),
            mode_stack: Vec::new(),
            connect_target: None,
            preamble: Vec::new(),
            output_targets: OutputTargets::default(),
            include_stack: Vec::new(),
        }
    }

    fn error_action(&self) -> ErrorAction {
        self.mode_stack
            .last()
            .copied()
            .unwrap_or(self.options.default_error_action)
    }

    /// Close the pending batch. `separator` is where the closing separator
    /// starts; the next batch's span begins on the line after it.
    ///
    /// Blank batches are kept so that batch texts and separators still
    /// rebuild the source. They take no `:list` output, which waits for the
    /// next batch with something to run.
    fn close_batch(&mut self, repeat: u32, separator: Option<&SourcePosition>) {
        let mut pending = std::mem::take(&mut self.pending);
        self.pending.on_separator_line = separator.is_some();

        let Some(start) = pending
            .start
            .take()
            .or_else(|| pending.first.take())
            .or_else(|| separator.cloned())
        else {
            return;
        };
        let end = pending.end.take().unwrap_or_else(|| start.clone());
        let blank = pending.is_blank();
        let mut line_map = pending.line_map;
        if pending.at_line_start {
            line_map.push(end.clone());
        }

        let batch = Batch {
            index: self.batches.len(),
            text: pending.text,
            start,
            end,
            repeat,
            error_action: self.error_action(),
            connect_target: self.connect_target.clone(),
            preamble: if blank {
                Vec::new()
            } else {
                std::mem::take(&mut self.preamble)
            },
            line_map,
        };
        tracing::trace!(index = batch.index, repeat, blank, "closed batch");
        self.batches.push(batch);
    }

    /// Blank batches after the last real one are dropped
    fn finish(mut self) -> Script {
        while self.batches.last().is_some_and(Batch::is_blank) {
            self.batches.pop();
        }
        Script {
            batches: self.batches,
            trailing_messages: self.preamble,
            output_targets: self.output_targets,
        }
    }
}

/// Builds a `Script` from script text.
///
/// Includes are read through `R`; see `FsIncludeResolver` and
/// `MemoryIncludeResolver`.
#[derive(Debug, Clone)]
pub struct BatchBuilder<R> {
    resolver: R,
    options: ParserOptions,
}

impl<R: IncludeResolver> BatchBuilder<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            options: ParserOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Lex and build `text`, seeding the variable table with
    /// `initial_variables`.
    ///
    /// Nothing is returned for a script that fails to parse, so a caller can
    /// never execute part of a broken script.
    #[tracing::instrument(skip_all, fields(bytes = text.len()))]
    pub fn build<I, K, V>(&self, text: &str, initial_variables: I) -> Result<Script, ParseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let tokens = Lexer::new(text, SourceFile::Script).tokenize()?;
        let script = self.build_tokens(tokens, initial_variables.into_iter().collect())?;
        tracing::debug!(
            batches = script.batches.len(),
            instances = script.instance_count(),
            "script built"
        );
        Ok(script)
    }

    /// Build from an already lexed token stream
    pub fn build_tokens(
        &self,
        tokens: Vec<Token>,
        variables: VariableResolver,
    ) -> Result<Script, ParseError> {
        let mut state = BuildState::new(&self.options, variables);
        if self.walk(tokens, &mut state)? == Flow::Continue {
            state.close_batch(1, None);
        }
        Ok(state.finish())
    }

    fn walk(&self, tokens: Vec<Token>, state: &mut BuildState<'_>) -> Result<Flow, ParseError> {
        for token in tokens {
            match token.kind {
                TokenKind::Text
                | TokenKind::QuotedString
                | TokenKind::QuotedIdentifier
                | TokenKind::LineComment
                | TokenKind::BlockComment => {
                    state
                        .pending
                        .append(&token.text, &token.start, &token.end, true);
                }
                TokenKind::VariableReference { name } => {
                    let value = state.variables.resolve(&name, &token.start)?.to_string();
                    state
                        .pending
                        .append(&value, &token.start, &token.end, false);
                }
                TokenKind::BatchSeparator { repeat } => {
                    state.close_batch(repeat, Some(&token.start));
                }
                TokenKind::Command(command) => {
                    if self.command(command, &token.start, state)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn command(
        &self,
        command: PreprocessorCommand,
        at: &SourcePosition,
        state: &mut BuildState<'_>,
    ) -> Result<Flow, ParseError> {
        tracing::trace!(command = %command.kind, position = %at, "preprocessor command");
        match command.kind {
            CommandKind::SetVar => {
                let (name, value) = parse_setvar(&command, &state.variables)?;
                match value {
                    Some(value) => {
                        state.variables.set(name, value);
                    }
                    None => {
                        state.variables.remove(&name);
                    }
                }
            }
            CommandKind::Include => return self.include(&command, at, state),
            CommandKind::OnError => {
                let action = ErrorAction::from_argument(&command.arguments).ok_or_else(|| {
                    invalid_arguments(&command, "expected 'exit' or 'ignore'")
                })?;
                state.mode_stack.push(action);
            }
            CommandKind::Connect => {
                let target = required_argument(&command, &state.variables, "missing server name")?;
                state.connect_target = Some(target);
            }
            CommandKind::List => {
                let listing = state.pending.text.clone();
                state.preamble.push(listing);
            }
            CommandKind::ListVar => {
                let listing = state.variables.listing();
                state.preamble.push(listing);
            }
            CommandKind::Out => {
                let target = required_argument(&command, &state.variables, "missing target")?;
                state.output_targets.out = Some(target);
            }
            CommandKind::Error => {
                let target = required_argument(&command, &state.variables, "missing target")?;
                state.output_targets.error = Some(target);
            }
            CommandKind::PerfTrace => {
                let target = required_argument(&command, &state.variables, "missing target")?;
                state.output_targets.perftrace = Some(target);
            }
            CommandKind::Reset => state.pending = PendingBatch::default(),
            CommandKind::Quit => return Ok(Flow::Stop),
            CommandKind::Exit => {
                state.close_batch(1, None);
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn include(
        &self,
        command: &PreprocessorCommand,
        at: &SourcePosition,
        state: &mut BuildState<'_>,
    ) -> Result<Flow, ParseError> {
        let path = required_argument(command, &state.variables, "missing file path")?;

        if state.include_stack.len() >= self.options.max_include_depth {
            return Err(ParseError::new(
                ParseErrorKind::IncludeDepthExceeded(self.options.max_include_depth),
                at.clone(),
            ));
        }

        let file = self.resolver.read(&path, &at.file).map_err(|err| {
            ParseError::new(
                ParseErrorKind::IncludeNotFound {
                    path: path.clone(),
                    reason: err.to_string(),
                },
                at.clone(),
            )
        })?;

        if state.include_stack.contains(&file.path) {
            return Err(ParseError::new(
                ParseErrorKind::IncludeCycle(file.path),
                at.clone(),
            ));
        }

        tracing::debug!(
            path = %file.path,
            depth = state.include_stack.len() + 1,
            "expanding include"
        );
        let tokens = Lexer::new(&file.text, SourceFile::include(&file.path)).tokenize()?;

        state.include_stack.push(file.path);
        let flow = self.walk(tokens, state)?;
        state.include_stack.pop();
        Ok(flow)
    }
}

fn invalid_arguments(command: &PreprocessorCommand, reason: &str) -> ParseError {
    ParseError::new(
        ParseErrorKind::InvalidArguments {
            command: command.kind.name(),
            reason: reason.to_string(),
        },
        command.arguments_start.clone(),
    )
}

/// Substitute and unquote a command's argument, failing if it is empty
fn required_argument(
    command: &PreprocessorCommand,
    variables: &VariableResolver,
    missing: &str,
) -> Result<String, ParseError> {
    let substituted = variables.substitute(&command.arguments, &command.arguments_start)?;
    let value = unquote(substituted.trim());
    if value.is_empty() {
        return Err(invalid_arguments(command, missing));
    }
    Ok(value)
}

/// Strip surrounding double quotes, collapsing `""` to `"`
fn unquote(text: &str) -> String {
    match text
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => text.to_string(),
    }
}

/// Split `:setvar` arguments into a name and an optional value. A missing
/// value means the variable is removed.
fn parse_setvar(
    command: &PreprocessorCommand,
    variables: &VariableResolver,
) -> Result<(String, Option<String>), ParseError> {
    let arguments = command.arguments.trim();
    let (name, rest) = match arguments.find(char::is_whitespace) {
        Some(split) => (&arguments[..split], arguments[split..].trim()),
        None => (arguments, ""),
    };

    if name.is_empty() {
        return Err(invalid_arguments(command, "missing variable name"));
    }
    if !is_valid_name(name) {
        return Err(invalid_arguments(
            command,
            &format!("'{}' is not a valid variable name", name),
        ));
    }
    if rest.is_empty() {
        return Ok((name.to_string(), None));
    }

    let raw = if rest.starts_with('"') {
        parse_quoted_value(rest).ok_or_else(|| {
            invalid_arguments(command, "unterminated or malformed quoted value")
        })?
    } else {
        rest.to_string()
    };

    let value = variables.substitute(&raw, &command.arguments_start)?;
    Ok((name.to_string(), Some(value)))
}

/// Parse `"..."` with `""` escapes; nothing but whitespace may follow
fn parse_quoted_value(text: &str) -> Option<String> {
    let mut value = String::new();
    let mut chars = text.chars().skip(1).peekable();
    loop {
        match chars.next()? {
            '"' if chars.peek() == Some(&'"') => {
                chars.next();
                value.push('"');
            }
            '"' => break,
            c => value.push(c),
        }
    }
    chars.all(char::is_whitespace).then_some(value)
}
