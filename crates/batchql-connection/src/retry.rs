//! Retry with exponential backoff
//!
//! ```ignore
//! use batchql_connection::retry::{RetryConfig, RetryPolicy};
//!
//! let policy = RetryPolicy::from_config(&RetryConfig::default());
//! let session = policy.execute(|_attempt| backend.open(None)).await?;
//! ```

mod backoff;
mod policy;


pub use backoff::BackoffStrategy;
pub use policy::{
    RetryConfig, RetryDecision, RetryEvent, RetryPolicy, RetryState,
    default_transient_error_numbers,
};
