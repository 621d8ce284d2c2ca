//! Per-batch execution results

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::BackendError;

/// Outcome of one execution of one batch.
///
/// `errors` and `messages` keep the order in which the backend produced them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub rows_affected: Option<u64>,
    pub errors: Vec<BackendError>,
    pub messages: Vec<String>,
    /// Set when the session failed below the server error level
    /// (broken connection, timeout, driver fault)
    pub driver_failure: Option<String>,
    pub connection_broken: bool,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// First error at fatal severity, if any
    pub fn fatal_error(&self) -> Option<&BackendError> {
        self.errors.iter().find(|e| e.is_fatal())
    }

    /// A batch fails when it raised a fatal error, lost its connection, or
    /// hit a driver-level failure.
    pub fn classify(&mut self) {
        self.success = self.fatal_error().is_none()
            && !self.connection_broken
            && self.driver_failure.is_none();
    }
}
