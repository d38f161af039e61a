//! Shared helpers.

mod retry;

pub use retry::{with_retry, Attempt, RetryConfig};
