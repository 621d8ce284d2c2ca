//! Scripting variables
//!
//! Variables are set by the caller before parsing and by `:setvar` while the
//! builder walks the script. Lookups are case-insensitive and a reference to
//! an undefined variable is an error rather than an empty string.

use std::collections::HashMap;

use batchql_core::{ParseError, ParseErrorKind, SourcePosition};


/// True if `name` can be used as a variable name: a letter or underscore
/// followed by letters, digits, underscores or hyphens.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Variable {
    /// Spelling used by the most recent assignment
    name: String,
    value: String,
}

/// Case-insensitive variable table with `$(name)` substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableResolver {
    values: HashMap<String, Variable>,
}

impl VariableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> String {
        name.to_ascii_uppercase()
    }

    /// Assign a variable, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let variable = Variable {
            name: name.clone(),
            value: value.into(),
        };
        self.values
            .insert(Self::key(&name), variable)
            .map(|previous| previous.value)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&Self::key(name)).map(|v| v.value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(&Self::key(name)).map(|v| v.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&Self::key(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Variables as `(name, value)` in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .values()
            .map(|v| (v.name.as_str(), v.value.as_str()))
    }

    /// All variables as `(name, value)`, ordered by name
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self.iter().collect();
        entries.sort_by_key(|(name, _)| name.to_ascii_uppercase());
        entries
    }

    /// One `name = "value"` line per variable, as printed by `:listvar`
    pub fn listing(&self) -> String {
        self.sorted()
            .iter()
            .map(|(name, value)| format!("{} = \"{}\"", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up a variable referenced at `position`
    pub fn resolve(&self, name: &str, position: &SourcePosition) -> Result<&str, ParseError> {
        self.get(name).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::UndefinedVariable(name.to_string()),
                position.clone(),
            )
        })
    }

    /// Replace every `$(name)` in `text`. `start` is the position of the
    /// first character of `text` and is used to position errors.
    pub fn substitute(&self, text: &str, start: &SourcePosition) -> Result<String, ParseError> {
        let mut output = String::with_capacity(text.len());
        let mut position = start.clone();
        let mut rest = text;

        while let Some(found) = rest.find("$(") {
            let (before, reference) = rest.split_at(found);
            output.push_str(before);
            advance(&mut position, before);

            let Some(close) = reference.find(')') else {
                return Err(ParseError::new(
                    ParseErrorKind::MalformedVariableReference,
                    position,
                ));
            };
            let name = &reference[2..close];
            if !is_valid_name(name) {
                return Err(ParseError::new(
                    ParseErrorKind::MalformedVariableReference,
                    position,
                ));
            }

            output.push_str(self.resolve(name, &position)?);
            advance(&mut position, &reference[..=close]);
            rest = &reference[close + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }
}

impl<K, V> FromIterator<(K, V)> for VariableResolver
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut resolver = Self::new();
        for (name, value) in iter {
            resolver.set(name, value);
        }
        resolver
    }
}

fn advance(position: &mut SourcePosition, text: &str) {
    for c in text.chars() {
        position.offset += c.len_utf8();
        if c == '\n' {
            position.line += 1;
            position.column = 1;
        } else {
            position.column += 1;
        }
    }
}
