//! Retry policy for network operations with error classification.

use reqwest::StatusCode;
use std::time::Duration;

use crate::error::MipError;

/// Maximum number of attempts for one network operation.
pub const MAX_ATTEMPTS: usize = 3;

/// Delay before the second attempt; doubles for every further attempt.
pub const BASE_DELAY_MS: u64 = 500;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy that keeps the attempt count but never sleeps. Used by tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Maps a non-success status to a typed error.
pub fn status_error(url: &str, status: StatusCode) -> MipError {
    MipError::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
    }
}

/// Transport failures and 5xx responses are retried; 4xx responses and
/// anything that is not a network problem are not.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<MipError>() {
        Some(MipError::HttpStatus { status, .. }) => *status >= 500,
        Some(MipError::Network { .. }) => true,
        Some(_) => false,
        None => true,
    }
}
