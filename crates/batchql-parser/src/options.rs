//! Parser configuration

use batchql_core::ErrorAction;
use serde::{Deserialize, Serialize};

/// Options for building a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Maximum nesting of `:r` includes; 0 disables includes
    pub max_include_depth: usize,
    /// Error action for batches that precede any `:on error`
    pub default_error_action: ErrorAction,
}

impl ParserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn with_default_error_action(mut self, action: ErrorAction) -> Self {
        self.default_error_action = action;
        self
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_include_depth: 16,
            default_error_action: ErrorAction::Exit,
        }
    }
}
