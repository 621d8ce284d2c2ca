//! Shared helpers for the engine integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use batchql_core::{
    Backend, BackendError, DriverError, ExecutionError, Notice, NoticeSender, Script, Session,
};
use batchql_engine::{ExecutionEngine, ExecutionEvent, RunSummary};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Route engine logs to the test harness once per test binary.
/// Set `RUST_LOG` to widen what is shown.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("batchql=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// In-memory backend that records every batch it executes.
///
/// A line containing `RAISERROR` streams a severity 16 error blamed on that
/// line; a line starting with `PRINT` streams the rest of it as a message.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    executed: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn open(&self, _target: Option<&str>) -> Result<Box<dyn Session>, DriverError> {
        Ok(Box::new(RecordingSession {
            executed: self.executed.clone(),
        }))
    }
}

struct RecordingSession {
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Session for RecordingSession {
    async fn execute(
        &mut self,
        sql: &str,
        notices: &NoticeSender,
    ) -> Result<Option<u64>, DriverError> {
        self.executed.lock().unwrap().push(sql.to_string());

        for (index, line) in sql.lines().enumerate() {
            if let Some(rest) = line.trim().strip_prefix("PRINT ") {
                let _ = notices.send(Notice::Message(rest.trim_matches('\'').to_string()));
            }
            if line.contains("RAISERROR") {
                let error = BackendError::new(50000, 16, "raised by script")
                    .with_line(index as u32 + 1);
                let _ = notices.send(Notice::Error(error));
            }
        }
        Ok(None)
    }
}

/// Run `script` to completion and collect every event it produced
pub async fn run_script(
    engine: &ExecutionEngine,
    script: &Script,
    backend: &RecordingBackend,
) -> (Result<RunSummary, ExecutionError>, Vec<ExecutionEvent>) {
    let (events, mut receiver) = mpsc::channel(256);
    let result = engine
        .run(script, backend, &events, &CancellationToken::new())
        .await;
    drop(events);

    let mut collected = Vec::new();
    while let Some(event) = receiver.recv().await {
        collected.push(event);
    }
    (result, collected)
}
