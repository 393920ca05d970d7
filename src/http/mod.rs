//! HTTP client module with retry logic and error handling.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{BASE_DELAY_MS, MAX_ATTEMPTS, RetryPolicy, is_retryable, status_error};
