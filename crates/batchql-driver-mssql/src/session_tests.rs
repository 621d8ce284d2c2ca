//! Tests for batch classification and row count messages

use crate::session::{report_row_counts, returns_rows, rows_affected_message};
use batchql_core::Notice;
use rstest::rstest;
use tokio::sync::mpsc;

#[rstest]
#[case::select("SELECT 1", true)]
#[case::lowercase("select * from t", true)]
#[case::cte("WITH x AS (SELECT 1 AS a) SELECT a FROM x", true)]
#[case::leading_whitespace("\n\n   SELECT 1", true)]
#[case::line_comment("-- header\nSELECT 1", true)]
#[case::block_comment("/* a /* nested */ b */ SELECT 1", true)]
#[case::insert("INSERT INTO t VALUES (1)", false)]
#[case::create("CREATE TABLE t (id int)", false)]
#[case::selector_is_not_select("SELECTOR", false)]
#[case::comment_only("-- nothing here", false)]
#[case::unterminated_comment("/* SELECT 1", false)]
#[case::empty("", false)]
fn test_returns_rows(#[case] sql: &str, #[case] expected: bool) {
    assert_eq!(returns_rows(sql), expected);
}

#[test]
fn test_rows_affected_message() {
    assert_eq!(rows_affected_message(0), "(0 rows affected)");
    assert_eq!(rows_affected_message(1), "(1 row affected)");
    assert_eq!(rows_affected_message(42), "(42 rows affected)");
}

#[test]
fn test_row_counts_are_sent_in_statement_order() {
    let (notices, mut received) = mpsc::unbounded_channel();
    assert_eq!(report_row_counts(&[3, 1], &notices), 2);
    assert_eq!(
        received.try_recv().unwrap(),
        Notice::Message("(3 rows affected)".to_string())
    );
    assert_eq!(
        received.try_recv().unwrap(),
        Notice::Message("(1 row affected)".to_string())
    );
    assert!(received.try_recv().is_err());
}

#[test]
fn test_row_counts_stop_when_receiver_is_gone() {
    let (notices, received) = mpsc::unbounded_channel();
    drop(received);
    assert_eq!(report_row_counts(&[3, 1], &notices), 0);
    assert!(notices.is_closed());
}
