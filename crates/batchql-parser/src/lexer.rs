//! Script lexer
//!
//! Turns script text into classified tokens while tracking line and column
//! for every token. The lexer is a small state machine driven one character
//! at a time, in the same style as a statement splitter: string literals,
//! quoted identifiers and comments are consumed whole so that nothing inside
//! them can be mistaken for a separator, a command or a variable reference.
//!
//! `GO` separators and `:command` lines are only recognized at the start of
//! a line (after optional indentation).

use batchql_core::{
    CommandKind, ParseError, ParseErrorKind, PreprocessorCommand, SourceFile, SourcePosition,
    Token, TokenKind,
};

use crate::variables::is_valid_name;


/// Lazily produces tokens from script text.
///
/// Iterating yields `Ok(token)` items until the end of input, or a single
/// `Err` after which iteration stops.
#[derive(Debug, Clone)]
pub struct Lexer {
    chars: Vec<char>,
    file: SourceFile,
    index: usize,
    line: u32,
    column: u32,
    offset: usize,
    at_line_start: bool,
    failed: bool,
}

/// Result of looking ahead at a possible `GO` line
struct SeparatorScan {
    count: Option<String>,
    end: usize,
}

impl Lexer {
    /// Create a lexer over `text`, tagging every position with `file`
    pub fn new(text: &str, file: SourceFile) -> Self {
        Self {
            chars: text.chars().collect(),
            file,
            index: 0,
            line: 1,
            column: 1,
            offset: 0,
            at_line_start: true,
            failed: false,
        }
    }

    /// Resume lexing `text` at `position`, which must come from a previous
    /// token boundary in the same text.
    pub fn starting_at(text: &str, position: &SourcePosition) -> Self {
        let mut lexer = Self::new(text, position.file.clone());
        let offset = position.offset.min(text.len());
        lexer.index = text[..offset].chars().count();
        lexer.offset = offset;
        lexer.line = position.line;
        lexer.column = position.column;
        lexer.at_line_start = position.column == 1;
        lexer
    }

    /// Lex the whole input
    pub fn tokenize(self) -> Result<Vec<Token>, ParseError> {
        self.collect()
    }

    fn current_position(&self) -> SourcePosition {
        SourcePosition::new(self.file.clone(), self.line, self.column, self.offset)
    }

    fn char_at(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.char_at(self.index + ahead)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.char_at(self.index)?;
        self.index += 1;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn slice(&self, begin: usize) -> String {
        self.chars[begin..self.index].iter().collect()
    }

    fn error(&self, kind: ParseErrorKind, position: SourcePosition) -> ParseError {
        ParseError::new(kind, position)
    }

    fn is_horizontal_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r')
    }

    fn skip_horizontal(&self, mut index: usize) -> usize {
        while self.char_at(index).is_some_and(Self::is_horizontal_space) {
            index += 1;
        }
        index
    }

    fn is_line_comment_at(&self, index: usize) -> bool {
        self.char_at(index) == Some('-') && self.char_at(index + 1) == Some('-')
    }

    /// True if a line ends at `index` (newline, end of input or a trailing
    /// `--` comment)
    fn is_line_end_at(&self, index: usize) -> bool {
        match self.char_at(index) {
            None | Some('\n') => true,
            Some(_) => self.is_line_comment_at(index),
        }
    }

    fn at_token_boundary(&self) -> bool {
        matches!(
            (self.peek(0), self.peek(1)),
            (Some('\'' | '[' | '"'), _)
                | (Some('-'), Some('-'))
                | (Some('/'), Some('*'))
                | (Some('$'), Some('('))
        )
    }

    fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        if self.index >= self.chars.len() {
            return Ok(None);
        }

        if self.at_line_start {
            let first = self.skip_horizontal(self.index);
            if let Some(token) = self.line_directive(first)? {
                return Ok(Some(token));
            }
        }

        self.at_line_start = false;
        let start = self.current_position();
        let token = match (self.peek(0), self.peek(1)) {
            (Some('\''), _) => self.quoted_string(start)?,
            (Some('['), _) => self.quoted_identifier(start, ']')?,
            (Some('"'), _) => self.quoted_identifier(start, '"')?,
            (Some('-'), Some('-')) => self.line_comment(start),
            (Some('/'), Some('*')) => self.block_comment(start)?,
            (Some('$'), Some('(')) => self.variable_reference(start)?,
            _ => self.text(start),
        };
        Ok(Some(token))
    }

    /// Handle a line that starts with a separator or a command. Indentation
    /// before either is returned as its own text token first.
    fn line_directive(&mut self, first: usize) -> Result<Option<Token>, ParseError> {
        let is_command = self.char_at(first) == Some(':')
            && self.char_at(first + 1).is_some_and(|c| c.is_ascii_alphabetic());
        let separator = if is_command {
            None
        } else {
            self.scan_separator(first)
        };

        if !is_command && separator.is_none() {
            return Ok(None);
        }

        if first > self.index {
            let start = self.current_position();
            let begin = self.index;
            while self.index < first {
                self.bump();
            }
            let text = self.slice(begin);
            return Ok(Some(Token::new(TokenKind::Text, text, start, self.current_position())));
        }

        self.at_line_start = false;
        match separator {
            Some(scan) => self.separator(scan).map(Some),
            None => self.command().map(Some),
        }
    }

    fn scan_separator(&self, at: usize) -> Option<SeparatorScan> {
        let g = self.char_at(at)?;
        let o = self.char_at(at + 1)?;
        if !g.eq_ignore_ascii_case(&'g') || !o.eq_ignore_ascii_case(&'o') {
            return None;
        }

        let mut index = at + 2;
        let boundary = match self.char_at(index) {
            None => true,
            Some(c) => c == '\n' || Self::is_horizontal_space(c) || self.is_line_comment_at(index),
        };
        if !boundary {
            return None;
        }

        index = self.skip_horizontal(index);
        let digits_begin = index;
        while self.char_at(index).is_some_and(|c| c.is_ascii_digit()) {
            index += 1;
        }

        let (count, end) = if index > digits_begin {
            let count: String = self.chars[digits_begin..index].iter().collect();
            (Some(count), index)
        } else {
            (None, at + 2)
        };

        if !self.is_line_end_at(self.skip_horizontal(index)) {
            return None;
        }
        Some(SeparatorScan { count, end })
    }

    fn separator(&mut self, scan: SeparatorScan) -> Result<Token, ParseError> {
        let start = self.current_position();
        let begin = self.index;
        while self.index < scan.end {
            self.bump();
        }

        let repeat = match scan.count {
            None => 1,
            Some(count) => match count.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(self.error(ParseErrorKind::InvalidRepeatCount(count), start)),
            },
        };

        let text = self.slice(begin);
        Ok(Token::new(
            TokenKind::BatchSeparator { repeat },
            text,
            start,
            self.current_position(),
        ))
    }

    fn take_word(&mut self) -> String {
        let begin = self.index;
        while self.peek(0).is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        self.slice(begin)
    }

    fn skip_spaces(&mut self) {
        while self.peek(0).is_some_and(Self::is_horizontal_space) {
            self.bump();
        }
    }

    fn command(&mut self) -> Result<Token, ParseError> {
        let start = self.current_position();
        let begin = self.index;
        self.bump();

        let name = self.take_word();
        let kind = if name.eq_ignore_ascii_case("on") {
            self.skip_spaces();
            let second = self.take_word();
            if !second.eq_ignore_ascii_case("error") {
                let full = format!("{} {}", name, second);
                return Err(self.error(
                    ParseErrorKind::UnknownCommand(full.trim_end().to_string()),
                    start,
                ));
            }
            CommandKind::OnError
        } else {
            match CommandKind::from_name(&name) {
                Some(kind) => kind,
                None => return Err(self.error(ParseErrorKind::UnknownCommand(name), start)),
            }
        };

        self.skip_spaces();
        let arguments_start = self.current_position();
        let arguments_begin = self.index;
        while self.peek(0).is_some_and(|c| c != '\n') {
            self.bump();
        }
        let arguments = self.slice(arguments_begin).trim_end().to_string();

        let text = self.slice(begin);
        let command = PreprocessorCommand {
            kind,
            arguments,
            arguments_start,
        };
        Ok(Token::new(
            TokenKind::Command(command),
            text,
            start,
            self.current_position(),
        ))
    }

    fn quoted_string(&mut self, start: SourcePosition) -> Result<Token, ParseError> {
        let begin = self.index;
        self.bump();
        loop {
            match self.bump() {
                None => return Err(self.error(ParseErrorKind::UnterminatedString, start)),
                Some('\'') => {
                    // A doubled quote is an escaped quote, not the end
                    if self.peek(0) == Some('\'') {
                        self.bump();
                    } else {
                        break;
                    }
                }
                Some(_) => {}
            }
        }
        let text = self.slice(begin);
        Ok(Token::new(TokenKind::QuotedString, text, start, self.current_position()))
    }

    /// `[name]` or `"name"`; a doubled closing delimiter is an escape
    fn quoted_identifier(
        &mut self,
        start: SourcePosition,
        close: char,
    ) -> Result<Token, ParseError> {
        let begin = self.index;
        self.bump();
        loop {
            match self.bump() {
                None => return Err(self.error(ParseErrorKind::UnterminatedIdentifier, start)),
                Some(c) if c == close => {
                    if self.peek(0) == Some(close) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                Some(_) => {}
            }
        }
        let text = self.slice(begin);
        Ok(Token::new(
            TokenKind::QuotedIdentifier,
            text,
            start,
            self.current_position(),
        ))
    }

    fn line_comment(&mut self, start: SourcePosition) -> Token {
        let begin = self.index;
        while self.peek(0).is_some_and(|c| c != '\n') {
            self.bump();
        }
        let text = self.slice(begin);
        Token::new(TokenKind::LineComment, text, start, self.current_position())
    }

    fn block_comment(&mut self, start: SourcePosition) -> Result<Token, ParseError> {
        let begin = self.index;
        self.bump();
        self.bump();
        let mut depth = 1usize;

        while depth > 0 {
            match (self.peek(0), self.peek(1)) {
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => return Err(self.error(ParseErrorKind::UnterminatedComment, start)),
            }
        }

        let text = self.slice(begin);
        Ok(Token::new(TokenKind::BlockComment, text, start, self.current_position()))
    }

    fn variable_reference(&mut self, start: SourcePosition) -> Result<Token, ParseError> {
        let begin = self.index;
        self.bump();
        self.bump();
        let name_begin = self.index;

        loop {
            match self.peek(0) {
                Some(')') => break,
                None | Some('\n') => {
                    return Err(self.error(ParseErrorKind::MalformedVariableReference, start));
                }
                Some(_) => {
                    self.bump();
                }
            }
        }

        let name = self.slice(name_begin);
        self.bump();

        if !is_valid_name(&name) {
            return Err(self.error(ParseErrorKind::MalformedVariableReference, start));
        }

        let text = self.slice(begin);
        Ok(Token::new(
            TokenKind::VariableReference { name },
            text,
            start,
            self.current_position(),
        ))
    }

    /// Plain text up to the next quote, comment, variable reference, or
    /// through the end of the current line.
    fn text(&mut self, start: SourcePosition) -> Token {
        let begin = self.index;
        while let Some(c) = self.peek(0) {
            if self.index > begin && self.at_token_boundary() {
                break;
            }
            self.bump();
            if c == '\n' {
                self.at_line_start = true;
                break;
            }
        }
        let text = self.slice(begin);
        Token::new(TokenKind::Text, text, start, self.current_position())
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_token() {
            Ok(token) => token.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Lex `text` as the top-level script
pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(text, SourceFile::Script).tokenize()
}
