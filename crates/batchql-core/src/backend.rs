//! Capability traits for the execution backend

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BackendError, DriverError};

/// Something the server reported while a batch was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Informational output (PRINT, row counts, low-severity messages)
    Message(String),
    /// A server error, reported in arrival order
    Error(BackendError),
}

/// Channel a session uses to stream notices while a batch is in flight.
pub type NoticeSender = mpsc::UnboundedSender<Notice>;

/// Opens sessions against a database.
///
/// Used by the execution engine to acquire (and re-acquire after a failure)
/// the session batches run on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a new session. `target` is the server named by `:connect`, or
    /// `None` for the backend's default.
    async fn open(&self, target: Option<&str>) -> Result<Box<dyn Session>, DriverError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn open(&self, target: Option<&str>) -> Result<Box<dyn Session>, DriverError> {
        (**self).open(target).await
    }
}

/// A live session that runs batch text.
#[async_trait]
pub trait Session: Send {
    /// Run one batch.
    ///
    /// Server messages and errors must be sent through `notices` as they
    /// arrive. A returned `Err(DriverError::Server(..))` is treated as an
    /// error that was *not* already sent as a notice; other `Err` variants
    /// describe failures below the server level. `Ok` carries the number of
    /// rows affected when the backend knows it.
    async fn execute(
        &mut self,
        sql: &str,
        notices: &NoticeSender,
    ) -> Result<Option<u64>, DriverError>;

    /// Release the session
    async fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
