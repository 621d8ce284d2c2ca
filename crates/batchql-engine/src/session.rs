//! The session a run executes batches on

use batchql_connection::{RetryEvent, RetryPolicy};
use batchql_core::{Backend, DriverError, Session};

/// Holds at most one open session and the connect target it was opened
/// for. A session is reused until the target changes or it is invalidated.
#[derive(Default)]
pub(crate) struct SessionSlot {
    session: Option<Box<dyn Session>>,
    target: Option<String>,
}

impl SessionSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make sure a session for `target` is open, opening one through
    /// `retry` if needed
    pub(crate) async fn acquire(
        &mut self,
        retry: &RetryPolicy,
        backend: &dyn Backend,
        target: Option<&str>,
    ) -> Result<(), DriverError> {
        if self.session.is_some() && self.target.as_deref() == target {
            return Ok(());
        }
        self.close().await;

        tracing::debug!(connect_target = ?target, "opening session");
        let session = retry
            .execute_with_observer(|_| backend.open(target), log_retry_event)
            .await?;

        self.session = Some(session);
        self.target = target.map(str::to_string);
        Ok(())
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Box<dyn Session>> {
        self.session.as_mut()
    }

    /// Forget the current session without closing it; used once it is
    /// known to be broken or was abandoned mid-batch
    pub(crate) fn invalidate(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("session discarded");
        }
    }

    pub(crate) async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close().await {
                tracing::warn!(error = %err, "failed to close session");
            }
        }
    }
}

fn log_retry_event(event: &RetryEvent) {
    match event {
        RetryEvent::Failed {
            attempt,
            error,
            retryable,
        } => tracing::warn!(attempt, error = %error, retryable, "session open failed"),
        RetryEvent::Exhausted { total_attempts } => {
            tracing::error!(total_attempts, "giving up opening a session")
        }
        other => tracing::trace!(event = ?other, "session open"),
    }
}
