//! Attempt classification and backoff scheduling.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::{Response, RetryStatuses, TransportError};

/// Larger attempt indices saturate the delay anyway.
const MAX_BACKOFF_EXPONENT: usize = 63;

/// What a single attempt produced, decided once before dispatch.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Timeout or connection failure.
    RetryableError(TransportError),
    /// Any other transport failure; surfaced immediately.
    FatalError(TransportError),
    /// Response with a status from the call's retry set.
    RetryableStatus(Response),
    /// Any other response.
    Terminal(Response),
}

impl Outcome {
    pub(crate) fn classify(
        result: Result<Response, TransportError>,
        statuses: &RetryStatuses,
    ) -> Self {
        match result {
            Ok(response) if statuses.contains(response.status()) => Self::RetryableStatus(response),
            Ok(response) => Self::Terminal(response),
            Err(err) if err.is_retryable() => Self::RetryableError(err),
            Err(err) => Self::FatalError(err),
        }
    }
}

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    /// Waits for `delay`.
    fn sleep(&self, delay: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Backoff for `attempt` given a jitter sample `unit` in `[0, 1)`:
/// `base * 2^attempt * (0.5 + unit)`.
///
/// Saturates at [`Duration::MAX`] instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: usize, unit: f64) -> Duration {
    let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
    let factor = 2f64.powi(exponent) * (0.5 + unit.clamp(0.0, 1.0));
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// [`backoff_delay`] with a fresh uniform jitter sample.
pub fn jittered_backoff(base: Duration, attempt: usize) -> Duration {
    backoff_delay(base, attempt, fastrand::f64())
}

/// Parses `Retry-After` when it holds a non-negative integer number of
/// seconds. HTTP-date values and anything else yield `None`.
///
/// Values beyond `u64::MAX` seconds saturate to [`Duration::MAX`].
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    Some(
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX),
    )
}
