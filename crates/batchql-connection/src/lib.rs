//! batchql connection - retry handling for backend sessions
//!
//! Session acquisition and batch submission both go through a
//! `RetryPolicy`, which separates transient failures (timeouts, dropped
//! connections, throttling errors) from permanent ones and spaces retries
//! out with exponential backoff.

pub mod retry;

pub use retry::{
    BackoffStrategy, RetryConfig, RetryDecision, RetryEvent, RetryPolicy, RetryState,
    default_transient_error_numbers,
};
