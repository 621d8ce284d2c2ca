//! Mapping tiberius errors onto driver errors

use batchql_core::{BackendError, DriverError};
use tiberius::error::Error;

/// Translate a tiberius error. Server errors keep their number, severity,
/// state and line; I/O failures keep their kind so retry classification
/// still works.
pub(crate) fn map_error(err: Error) -> DriverError {
    match err {
        Error::Server(token) => {
            let mut error = BackendError::new(token.code(), token.class(), token.message())
                .with_state(token.state())
                .with_line(token.line());
            if !token.procedure().is_empty() {
                error = error.with_procedure(token.procedure());
            }
            if !token.server().is_empty() {
                error.server = Some(token.server().to_string());
            }
            DriverError::Server(error)
        }
        Error::Io { kind, message } => DriverError::Io(std::io::Error::new(kind, message)),
        Error::Routing { host, port } => {
            DriverError::Connection(format!("server redirected the connection to {}:{}", host, port))
        }
        other => DriverError::Other(other.to_string()),
    }
}
