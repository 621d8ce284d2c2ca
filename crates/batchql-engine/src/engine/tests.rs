//! Tests for the execution engine

use super::*;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use batchql_connection::BackoffStrategy;
use batchql_core::{BackendError, NoticeSender};
use batchql_parser::{BatchBuilder, MemoryIncludeResolver};
use rstest::rstest;

/// State shared by a mock backend and every session it opens
#[derive(Default)]
struct Shared {
    opens: AtomicU32,
    open_failures: Mutex<VecDeque<DriverError>>,
    transient_failures: AtomicU32,
    executed: Mutex<Vec<String>>,
    targets: Mutex<Vec<Option<String>>>,
}

/// Backend whose sessions react to keywords in the batch text:
///
/// - `PRINT` streams a message
/// - `WARN` streams a severity 10 error
/// - `FAIL` streams a severity 16 error blamed on batch line 2
/// - `SERVERERR` returns a severity 16 error instead of streaming it
/// - `DROP` streams a message, then loses the connection
/// - `TRANSIENT` times out while `transient_failures` lasts
/// - `DEADLOCK` returns error 1205 while `transient_failures` lasts
/// - `HANG` streams "waiting" and never finishes
/// - `BADCANCEL` claims it was cancelled
#[derive(Clone, Default)]
struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    fn new() -> Self {
        Self::default()
    }

    fn with_open_failures(failures: Vec<DriverError>) -> Self {
        let backend = Self::new();
        *backend.shared.open_failures.lock().unwrap() = failures.into();
        backend
    }

    fn with_transient_failures(count: u32) -> Self {
        let backend = Self::new();
        backend.shared.transient_failures.store(count, Ordering::SeqCst);
        backend
    }

    fn opens(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    fn executed(&self) -> Vec<String> {
        self.shared.executed.lock().unwrap().clone()
    }

    fn targets(&self) -> Vec<Option<String>> {
        self.shared.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn open(&self, target: Option<&str>) -> Result<Box<dyn Session>, DriverError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared
            .targets
            .lock()
            .unwrap()
            .push(target.map(str::to_string));

        let failure = self.shared.open_failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(Box::new(MockSession {
                shared: self.shared.clone(),
            })),
        }
    }
}

struct MockSession {
    shared: Arc<Shared>,
}

impl MockSession {
    fn take_transient(&self) -> bool {
        self.shared
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn execute(
        &mut self,
        sql: &str,
        notices: &NoticeSender,
    ) -> Result<Option<u64>, DriverError> {
        self.shared.executed.lock().unwrap().push(sql.to_string());

        if sql.contains("TRANSIENT") && self.take_transient() {
            return Err(DriverError::Timeout("timed out".into()));
        }
        if sql.contains("DEADLOCK") && self.take_transient() {
            return Err(DriverError::Server(BackendError::new(
                1205,
                13,
                "Transaction was deadlocked",
            )));
        }
        if sql.contains("BADCANCEL") {
            return Err(DriverError::Cancelled);
        }
        if sql.contains("SERVERERR") {
            return Err(DriverError::Server(
                BackendError::new(208, 16, "Invalid object name 'gone'.").with_line(1),
            ));
        }
        if sql.contains("DROP") {
            let _ = notices.send(Notice::Message("partial".into()));
            return Err(DriverError::ConnectionBroken("reset by peer".into()));
        }
        if sql.contains("PRINT") {
            let _ = notices.send(Notice::Message("printed".into()));
        }
        if sql.contains("WARN") {
            let _ = notices.send(Notice::Error(BackendError::new(50000, 10, "just a warning")));
        }
        if sql.contains("FAIL") {
            let _ = notices.send(Notice::Error(
                BackendError::new(208, 16, "Invalid object name 'missing'.").with_line(2),
            ));
        }
        if sql.contains("HANG") {
            let _ = notices.send(Notice::Message("waiting".into()));
            std::future::pending::<()>().await;
        }
        Ok(Some(1))
    }
}

fn script(text: &str) -> Script {
    script_with(text, &[])
}

fn script_with(text: &str, variables: &[(&str, &str)]) -> Script {
    BatchBuilder::new(MemoryIncludeResolver::new())
        .build(text, variables.iter().copied())
        .expect("test script should build")
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(RetryPolicy::new(3, BackoffStrategy::from_millis(10, 100)))
}

async fn run(
    script: &Script,
    backend: &MockBackend,
) -> (Result<RunSummary, ExecutionError>, Vec<ExecutionEvent>) {
    let (events, mut receiver) = mpsc::channel(256);
    let cancel = CancellationToken::new();
    let result = engine().run(script, backend, &events, &cancel).await;
    drop(events);

    let mut collected = Vec::new();
    while let Some(event) = receiver.recv().await {
        collected.push(event);
    }
    (result, collected)
}

/// Compact event descriptions for order assertions
fn labels(events: &[ExecutionEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            ExecutionEvent::BatchStarted { batch, repeat, .. } => {
                format!("start {}.{}", batch, repeat)
            }
            ExecutionEvent::Message { batch, message } => match batch {
                Some(batch) => format!("message {}: {}", batch, message),
                None => format!("message: {}", message),
            },
            ExecutionEvent::Error { batch, .. } => format!("error {}", batch),
            ExecutionEvent::BatchCompleted {
                batch,
                repeat,
                result,
            } => format!(
                "done {}.{} {}",
                batch,
                repeat,
                if result.success { "ok" } else { "failed" }
            ),
            ExecutionEvent::ScriptCompleted { .. } => "completed".to_string(),
            ExecutionEvent::ScriptHalted { batch, .. } => format!("halted {:?}", batch),
            ExecutionEvent::ScriptCancelled { batch } => format!("cancelled {:?}", batch),
        })
        .collect()
}

mod ordering_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_batches_run_in_order_on_one_session() {
        let backend = MockBackend::new();
        let (result, events) = run(&script("SELECT 1\nGO\nSELECT 2"), &backend).await;

        let summary = result.unwrap();
        assert_eq!(summary.state, EngineState::Completed);
        assert_eq!(summary.batches_executed, 2);
        assert_eq!(summary.batches_failed, 0);
        assert_eq!(
            labels(&events),
            vec!["start 0.1", "done 0.1 ok", "start 1.1", "done 1.1 ok", "completed"]
        );
        assert_eq!(backend.executed(), vec!["SELECT 1\n", "\nSELECT 2"]);
        assert_eq!(backend.opens(), 1);
    }

    #[tokio::test]
    async fn test_repeats_run_consecutively() {
        let backend = MockBackend::new();
        let (_, events) = run(&script("INSERT INTO t DEFAULT VALUES\nGO 3\nSELECT 2"), &backend).await;

        let starts: Vec<String> = labels(&events)
            .into_iter()
            .filter(|l| l.starts_with("start"))
            .collect();
        assert_eq!(starts, vec!["start 0.1", "start 0.2", "start 0.3", "start 1.1"]);
        assert_eq!(backend.executed().len(), 4);
    }

    #[tokio::test]
    async fn test_messages_arrive_before_completion() {
        let backend = MockBackend::new();
        let (_, events) = run(&script("PRINT 'hi'"), &backend).await;

        assert_eq!(
            labels(&events),
            vec!["start 0.1", "message 0: printed", "done 0.1 ok", "completed"]
        );
        let ExecutionEvent::BatchCompleted { result, .. } = &events[2] else {
            panic!("expected BatchCompleted, got {:?}", events[2]);
        };
        assert_eq!(result.messages, vec!["printed".to_string()]);
        assert_eq!(result.rows_affected, Some(1));
    }

    #[tokio::test]
    async fn test_preamble_and_trailing_messages() {
        let backend = MockBackend::new();
        let (_, events) = run(
            &script_with("SELECT 1\n:list\nGO\n:listvar", &[("a", "1")]),
            &backend,
        )
        .await;

        assert_eq!(
            labels(&events),
            vec![
                "start 0.1",
                "message 0: SELECT 1\n",
                "done 0.1 ok",
                "message: a = \"1\"",
                "completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_batch_is_skipped_without_a_backend_call() {
        let backend = MockBackend::new();
        let (result, events) = run(&script("SELECT 1\nGO\n\nGO 3\nSELECT 2"), &backend).await;

        assert_eq!(result.unwrap().batches_executed, 2);
        assert_eq!(
            labels(&events),
            vec!["start 0.1", "done 0.1 ok", "start 2.1", "done 2.1 ok", "completed"]
        );
        assert_eq!(backend.executed(), vec!["SELECT 1\n", "\nSELECT 2"]);
    }

    #[tokio::test]
    async fn test_empty_script_completes() {
        let backend = MockBackend::new();
        let (result, events) = run(&script("  \n"), &backend).await;
        assert_eq!(result.unwrap().batches_executed, 0);
        assert_eq!(labels(&events), vec!["completed"]);
        assert_eq!(backend.opens(), 0);
    }

    #[tokio::test]
    async fn test_connect_target_opens_new_session() {
        let backend = MockBackend::new();
        let (result, _) = run(
            &script("SELECT 1\nGO\n:connect other,1444\nSELECT 2\nGO\nSELECT 3"),
            &backend,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(backend.targets(), vec![None, Some("other,1444".to_string())]);
    }
}

mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fatal_error_halts_by_default() {
        let backend = MockBackend::new();
        let (result, events) = run(&script("SELECT 1\nGO\nSELECT FAIL\nGO\nSELECT 3"), &backend).await;

        let summary = result.unwrap();
        assert_eq!(summary.state, EngineState::Halted);
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(
            labels(&events),
            vec!["start 0.1", "done 0.1 ok", "start 1.1", "error 1", "halted Some(1)"]
        );
        assert_eq!(backend.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_error_line_maps_to_script_position() {
        let backend = MockBackend::new();
        let (_, events) = run(&script("SELECT 1\nGO\nSELECT FAIL\nGO"), &backend).await;

        let position = events
            .iter()
            .find_map(|event| match event {
                ExecutionEvent::Error {
                    error: ReportedError::Backend { position, .. },
                    ..
                } => Some(position.clone()),
                _ => None,
            })
            .expect("an error event");
        assert_eq!(position.line_column(), (3, 1));
    }

    #[rstest]
    #[case::halt("", vec!["start 0.1", "error 0", "halted Some(0)"])]
    #[case::ignore(
        ":on error ignore\n",
        vec!["start 0.1", "error 0", "done 0.1 failed", "start 1.1", "done 1.1 ok", "completed"]
    )]
    #[tokio::test]
    async fn test_error_action(#[case] prefix: &str, #[case] expected: Vec<&str>) {
        let backend = MockBackend::new();
        let text = format!("{}SELECT FAIL\nGO\nSELECT 2", prefix);
        let (result, events) = run(&script(&text), &backend).await;

        assert!(result.is_ok());
        assert_eq!(labels(&events), expected);
    }

    #[tokio::test]
    async fn test_warning_does_not_fail_batch() {
        let backend = MockBackend::new();
        let (_, events) = run(&script("SELECT WARN"), &backend).await;
        assert_eq!(
            labels(&events),
            vec!["start 0.1", "error 0", "done 0.1 ok", "completed"]
        );
    }

    #[tokio::test]
    async fn test_returned_server_error_is_reported_once() {
        let backend = MockBackend::new();
        let (_, events) = run(&script("SELECT SERVERERR"), &backend).await;
        assert_eq!(labels(&events), vec!["start 0.1", "error 0", "halted Some(0)"]);

        let ExecutionEvent::Error {
            error: ReportedError::Backend { error, position },
            ..
        } = &events[1]
        else {
            panic!("expected backend error, got {:?}", events[1]);
        };
        assert_eq!(error.number, 208);
        assert_eq!(position.line_column(), (1, 1));
    }

    #[tokio::test]
    async fn test_broken_connection_fails_batch_and_reopens() {
        let backend = MockBackend::new();
        let (result, events) = run(
            &script(":on error ignore\nSELECT DROP\nGO\nSELECT 2"),
            &backend,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(
            labels(&events),
            vec![
                "start 0.1",
                "message 0: partial",
                "error 0",
                "done 0.1 failed",
                "start 1.1",
                "done 1.1 ok",
                "completed",
            ]
        );
        let ExecutionEvent::BatchCompleted { result, .. } = &events[3] else {
            panic!("expected BatchCompleted");
        };
        assert!(result.connection_broken);
        assert_eq!(backend.opens(), 2);
    }

    #[tokio::test]
    async fn test_unrequested_cancellation_is_internal_error() {
        let backend = MockBackend::new();
        let (result, events) = run(&script("SELECT BADCANCEL"), &backend).await;

        match result {
            Err(ExecutionError::Internal { batch, state, .. }) => {
                assert_eq!(batch, 0);
                assert_eq!(state, "awaiting");
            }
            other => panic!("expected internal error, got {:?}", other),
        }
        assert_eq!(labels(&events), vec!["start 0.1", "halted Some(0)"]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_aborts_run() {
        let backend = MockBackend::new();
        let (events, receiver) = mpsc::channel(1);
        drop(receiver);

        let result = engine()
            .run(&script("SELECT 1"), &backend, &events, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExecutionError::EventChannelClosed)));
    }
}

mod retry_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_session_open_retries_transient_failures() {
        let backend = MockBackend::with_open_failures(vec![
            DriverError::Timeout("login timeout".into()),
            DriverError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
        ]);
        let (result, events) = run(&script("SELECT 1"), &backend).await;

        assert_eq!(result.unwrap().state, EngineState::Completed);
        assert_eq!(backend.opens(), 3);
        assert_eq!(labels(&events), vec!["start 0.1", "done 0.1 ok", "completed"]);
    }

    #[tokio::test]
    async fn test_permanent_open_failure_halts_immediately() {
        let backend =
            MockBackend::with_open_failures(vec![DriverError::Connection("login failed".into())]);
        let (result, events) = run(&script("SELECT 1\nGO\nSELECT 2"), &backend).await;

        assert!(matches!(
            result,
            Err(ExecutionError::Connection(DriverError::Connection(_)))
        ));
        assert_eq!(backend.opens(), 1);
        assert_eq!(labels(&events), vec!["start 0.1", "halted Some(0)"]);
        assert!(backend.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_open_retries_halt() {
        let backend = MockBackend::with_open_failures(
            (0..10).map(|_| DriverError::Timeout("t".into())).collect(),
        );
        let (result, _) = run(&script("SELECT 1"), &backend).await;

        assert!(matches!(result, Err(ExecutionError::Connection(DriverError::Timeout(_)))));
        assert_eq!(backend.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_batch_failure_is_retried_on_new_session() {
        let backend = MockBackend::with_transient_failures(2);
        let (result, events) = run(&script("SELECT TRANSIENT"), &backend).await;

        assert_eq!(result.unwrap().batches_failed, 0);
        assert_eq!(backend.executed().len(), 3);
        assert_eq!(backend.opens(), 3);

        let labels = labels(&events);
        assert_eq!(labels.first().map(String::as_str), Some("start 0.1"));
        assert_eq!(
            labels.iter().filter(|l| l.contains("retrying batch")).count(),
            2
        );
        assert_eq!(labels[labels.len() - 2], "done 0.1 ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_server_error_keeps_session() {
        let backend = MockBackend::with_transient_failures(1);
        let (result, _) = run(&script("UPDATE DEADLOCK"), &backend).await;

        assert!(result.is_ok());
        assert_eq!(backend.executed().len(), 2);
        assert_eq!(backend.opens(), 1);
    }
}

mod cancellation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cancel_while_awaiting() {
        let backend = MockBackend::new();
        let cancel = CancellationToken::new();
        let (handle, mut receiver) = engine().spawn(
            script("SELECT HANG\nGO\nSELECT 2"),
            Arc::new(backend.clone()),
            cancel.clone(),
        );

        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            let waiting =
                matches!(&event, ExecutionEvent::Message { message, .. } if message == "waiting");
            events.push(event);
            if waiting {
                cancel.cancel();
            }
        }

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.state, EngineState::Cancelled);
        assert_eq!(
            labels(&events),
            vec!["start 0.1", "message 0: waiting", "cancelled Some(0)"]
        );
        assert_eq!(backend.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let backend = MockBackend::new();
        let (events, mut receiver) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = engine()
            .run(&script("SELECT 1\nGO\nSELECT 2"), &backend, &events, &cancel)
            .await
            .unwrap();
        drop(events);

        let mut collected = Vec::new();
        while let Some(event) = receiver.recv().await {
            collected.push(event);
        }
        assert_eq!(summary.state, EngineState::Cancelled);
        assert_eq!(labels(&collected), vec!["cancelled Some(0)"]);
        assert_eq!(backend.opens(), 0);
    }
}
