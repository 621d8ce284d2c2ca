//! Sequential execution of a built script

use std::sync::Arc;
use std::time::Instant;

use batchql_connection::{RetryDecision, RetryPolicy};
use batchql_core::{
    Backend, Batch, DriverError, ExecutionError, ExecutionResult, Notice, Script, Session,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::event::{EngineState, ExecutionEvent, ReportedError, RunSummary};
use crate::session::SessionSlot;

#[cfg(test)]
mod tests;

/// Runs scripts one batch instance at a time.
///
/// The engine is cheap to clone and holds no per-run state, so one engine
/// can drive many runs.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    retry: RetryPolicy,
    event_buffer: usize,
}

impl ExecutionEngine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            event_buffer: EngineConfig::default().event_buffer,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(RetryPolicy::from_config(&config.retry)).with_event_buffer(config.event_buffer)
    }

    /// Capacity of the channel created by `spawn`
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute `script` on sessions opened from `backend`, sending every
    /// event to `events`.
    ///
    /// Batch failures are reported through events and do not make this
    /// return `Err`; only a session that cannot be opened, a backend that
    /// breaks its contract, or a dropped event receiver do.
    #[tracing::instrument(skip_all, fields(run_id = tracing::field::Empty, batches = script.batches.len()))]
    pub async fn run(
        &self,
        script: &Script,
        backend: &dyn Backend,
        events: &mpsc::Sender<ExecutionEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, ExecutionError> {
        let run = Run::new(&self.retry, backend, events, cancel);
        tracing::Span::current().record("run_id", tracing::field::display(run.summary.run_id));
        run.execute(script).await
    }

    /// Run `script` on a new task, returning its handle and the event stream.
    pub fn spawn(
        &self,
        script: Script,
        backend: Arc<dyn Backend>,
        cancel: CancellationToken,
    ) -> (
        JoinHandle<Result<RunSummary, ExecutionError>>,
        mpsc::Receiver<ExecutionEvent>,
    ) {
        let (events, receiver) = mpsc::channel(self.event_buffer);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine
                .run(&script, backend.as_ref(), &events, &cancel)
                .await
        });
        (handle, receiver)
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// How the run continues after a batch instance
enum Step {
    Continue,
    Halted,
    Cancelled,
}

/// Outcome of submitting a batch once
enum Attempt {
    Finished(Option<u64>),
    Failed {
        error: DriverError,
        notices_seen: bool,
    },
    Cancelled,
}

/// State of a single `run` call
struct Run<'a> {
    retry: &'a RetryPolicy,
    backend: &'a dyn Backend,
    events: &'a mpsc::Sender<ExecutionEvent>,
    cancel: &'a CancellationToken,
    session: SessionSlot,
    summary: RunSummary,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(
        retry: &'a RetryPolicy,
        backend: &'a dyn Backend,
        events: &'a mpsc::Sender<ExecutionEvent>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            retry,
            backend,
            events,
            cancel,
            session: SessionSlot::new(),
            summary: RunSummary::new(),
            started: Instant::now(),
        }
    }

    fn set_state(&mut self, state: EngineState) {
        tracing::trace!(from = %self.summary.state, to = %state, "engine state");
        self.summary.state = state;
    }

    async fn execute(mut self, script: &Script) -> Result<RunSummary, ExecutionError> {
        self.set_state(EngineState::Running);
        tracing::info!(
            batches = script.batches.len(),
            instances = script.instance_count(),
            "starting script"
        );

        for batch in &script.batches {
            if batch.is_blank() {
                tracing::trace!(batch = batch.index, "skipping blank batch");
                continue;
            }
            for repeat in 1..=batch.repeat {
                match self.run_instance(batch, repeat).await {
                    Ok(Step::Continue) => {}
                    Ok(Step::Halted) => return Ok(self.finish(EngineState::Halted).await),
                    Ok(Step::Cancelled) => return Ok(self.finish(EngineState::Cancelled).await),
                    Err(err) => {
                        self.session.invalidate();
                        self.set_state(EngineState::Halted);
                        tracing::error!(error = %err, "script aborted");
                        return Err(err);
                    }
                }
            }
        }

        for message in &script.trailing_messages {
            emit(
                self.events,
                ExecutionEvent::Message {
                    batch: None,
                    message: message.clone(),
                },
            )
            .await?;
        }

        let summary = self.finish(EngineState::Completed).await;
        emit(
            self.events,
            ExecutionEvent::ScriptCompleted {
                summary: summary.clone(),
            },
        )
        .await?;
        Ok(summary)
    }

    async fn finish(&mut self, state: EngineState) -> RunSummary {
        self.session.close().await;
        self.set_state(state);
        self.summary.elapsed = self.started.elapsed();
        tracing::info!(
            state = %state,
            executed = self.summary.batches_executed,
            failed = self.summary.batches_failed,
            elapsed_ms = self.summary.elapsed.as_millis() as u64,
            "script finished"
        );
        self.summary.clone()
    }

    #[tracing::instrument(skip_all, fields(batch = batch.index, repeat = repeat))]
    async fn run_instance(&mut self, batch: &Batch, repeat: u32) -> Result<Step, ExecutionError> {
        let (policy, backend, cancel) = (self.retry, self.backend, self.cancel);
        if cancel.is_cancelled() {
            return self.cancelled(Some(batch.index)).await;
        }

        self.set_state(EngineState::Dispatching);
        emit(
            self.events,
            ExecutionEvent::BatchStarted {
                batch: batch.index,
                repeat,
                repeat_count: batch.repeat,
                span: batch.span(),
            },
        )
        .await?;
        if repeat == 1 {
            for message in &batch.preamble {
                emit(
                    self.events,
                    ExecutionEvent::Message {
                        batch: Some(batch.index),
                        message: message.clone(),
                    },
                )
                .await?;
            }
        }

        let started = Instant::now();
        let mut result = ExecutionResult::new();
        let mut retry = policy.begin();

        loop {
            self.set_state(EngineState::Dispatching);
            let target = batch.connect_target.as_deref();
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                acquired = self.session.acquire(policy, backend, target) => Some(acquired),
            };
            match acquired {
                None => return self.cancelled(Some(batch.index)).await,
                Some(Err(error)) => {
                    tracing::error!(error = %error, "could not open a session");
                    self.set_state(EngineState::Halted);
                    emit(
                        self.events,
                        ExecutionEvent::ScriptHalted {
                            batch: Some(batch.index),
                            reason: format!("failed to open a session: {}", error),
                        },
                    )
                    .await?;
                    return Err(ExecutionError::Connection(error));
                }
                Some(Ok(())) => {}
            }

            retry.start_attempt();
            self.set_state(EngineState::Awaiting);
            let Some(session) = self.session.get_mut() else {
                return self.fail_internal(batch, "no open session after acquisition").await;
            };
            let attempt =
                run_attempt(session, self.events, cancel, batch, repeat, &mut result).await?;

            let (error, notices_seen) = match attempt {
                Attempt::Finished(rows) => {
                    result.rows_affected = rows;
                    break;
                }
                Attempt::Cancelled => return self.cancelled(Some(batch.index)).await,
                Attempt::Failed {
                    error,
                    notices_seen,
                } => (error, notices_seen),
            };

            if matches!(error, DriverError::Cancelled) {
                return self
                    .fail_internal(batch, "backend cancelled a batch without a cancel request")
                    .await;
            }
            if error.breaks_connection() {
                self.session.invalidate();
            }
            // Output already reached the caller, so the batch cannot be rerun
            if notices_seen {
                self.record_failure(batch, repeat, error, &mut result).await?;
                break;
            }

            match retry.on_failure(error) {
                RetryDecision::Retry { delay } => {
                    let message = format!(
                        "Transient failure, retrying batch in {} ms: {}",
                        delay.as_millis(),
                        retry.last_error().unwrap_or_default()
                    );
                    emit(
                        self.events,
                        ExecutionEvent::Message {
                            batch: Some(batch.index),
                            message,
                        },
                    )
                    .await?;
                    let slept = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if !slept {
                        return self.cancelled(Some(batch.index)).await;
                    }
                }
                RetryDecision::GiveUp { error, .. } => {
                    self.record_failure(batch, repeat, error, &mut result).await?;
                    break;
                }
            }
        }

        self.set_state(EngineState::Reporting);
        result.duration = started.elapsed();
        result.classify();
        self.summary.batches_executed += 1;

        if !result.success {
            self.summary.batches_failed += 1;
            if batch.error_action.halts() {
                let reason = failure_reason(&result);
                tracing::warn!(reason = %reason, "batch failed, halting script");
                emit(
                    self.events,
                    ExecutionEvent::ScriptHalted {
                        batch: Some(batch.index),
                        reason,
                    },
                )
                .await?;
                return Ok(Step::Halted);
            }
            tracing::info!("batch failed, continuing");
        }

        emit(
            self.events,
            ExecutionEvent::BatchCompleted {
                batch: batch.index,
                repeat,
                result,
            },
        )
        .await?;
        Ok(Step::Continue)
    }

    /// Report an error the backend returned instead of streaming
    async fn record_failure(
        &mut self,
        batch: &Batch,
        repeat: u32,
        error: DriverError,
        result: &mut ExecutionResult,
    ) -> Result<(), ExecutionError> {
        match error {
            DriverError::Server(error) => {
                forward_notice(self.events, batch, repeat, Notice::Error(error), result).await
            }
            other => {
                let message = other.to_string();
                tracing::warn!(error = %message, "batch failed below the server level");
                result.connection_broken |= other.breaks_connection();
                result.driver_failure = Some(message.clone());
                emit(
                    self.events,
                    ExecutionEvent::Error {
                        batch: batch.index,
                        repeat,
                        error: ReportedError::Driver { message },
                    },
                )
                .await
            }
        }
    }

    async fn cancelled(&mut self, batch: Option<usize>) -> Result<Step, ExecutionError> {
        // An abandoned in-flight call leaves the session mid-response
        if self.summary.state == EngineState::Awaiting {
            self.session.invalidate();
        }
        tracing::info!(batch = ?batch, "script cancelled");
        self.set_state(EngineState::Cancelled);
        emit(self.events, ExecutionEvent::ScriptCancelled { batch }).await?;
        Ok(Step::Cancelled)
    }

    async fn fail_internal(&mut self, batch: &Batch, message: &str) -> Result<Step, ExecutionError> {
        let error = ExecutionError::Internal {
            message: message.to_string(),
            batch: batch.index,
            span: batch.span(),
            state: self.summary.state.to_string(),
        };
        tracing::error!(error = %error, "internal error");
        self.session.invalidate();
        self.set_state(EngineState::Halted);
        emit(
            self.events,
            ExecutionEvent::ScriptHalted {
                batch: Some(batch.index),
                reason: error.to_string(),
            },
        )
        .await?;
        Err(error)
    }
}

/// Submit the batch once, forwarding notices as they arrive
async fn run_attempt(
    session: &mut Box<dyn Session>,
    events: &mpsc::Sender<ExecutionEvent>,
    cancel: &CancellationToken,
    batch: &Batch,
    repeat: u32,
    result: &mut ExecutionResult,
) -> Result<Attempt, ExecutionError> {
    let (notices, mut received) = mpsc::unbounded_channel();
    let mut notices_seen = false;

    let outcome = {
        let execution = session.execute(&batch.text, &notices);
        tokio::pin!(execution);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                Some(notice) = received.recv() => {
                    notices_seen = true;
                    forward_notice(events, batch, repeat, notice, result).await?;
                }
                outcome = &mut execution => break Some(outcome),
            }
        }
    };

    drop(notices);
    while let Ok(notice) = received.try_recv() {
        notices_seen = true;
        forward_notice(events, batch, repeat, notice, result).await?;
    }

    Ok(match outcome {
        None => Attempt::Cancelled,
        Some(Ok(rows)) => Attempt::Finished(rows),
        Some(Err(error)) => Attempt::Failed {
            error,
            notices_seen,
        },
    })
}

async fn forward_notice(
    events: &mpsc::Sender<ExecutionEvent>,
    batch: &Batch,
    repeat: u32,
    notice: Notice,
    result: &mut ExecutionResult,
) -> Result<(), ExecutionError> {
    match notice {
        Notice::Message(message) => {
            result.messages.push(message.clone());
            emit(
                events,
                ExecutionEvent::Message {
                    batch: Some(batch.index),
                    message,
                },
            )
            .await
        }
        Notice::Error(error) => {
            let position = batch
                .map_line(error.line)
                .unwrap_or_else(|| batch.start.clone());
            tracing::debug!(
                number = error.number,
                severity = error.severity,
                position = %position,
                "backend error"
            );
            result.errors.push(error.clone());
            emit(
                events,
                ExecutionEvent::Error {
                    batch: batch.index,
                    repeat,
                    error: ReportedError::Backend { error, position },
                },
            )
            .await
        }
    }
}

async fn emit(
    events: &mpsc::Sender<ExecutionEvent>,
    event: ExecutionEvent,
) -> Result<(), ExecutionError> {
    events
        .send(event)
        .await
        .map_err(|_| ExecutionError::EventChannelClosed)
}

fn failure_reason(result: &ExecutionResult) -> String {
    if let Some(error) = result.fatal_error() {
        return format!(
            "Msg {}, Level {}: {}",
            error.number,
            error.severity,
            error.description()
        );
    }
    if let Some(failure) = &result.driver_failure {
        return failure.clone();
    }
    "connection broken".to_string()
}
