// src/downloader/retry.rs

use crate::{constants, error::*};
use log::{debug, warn};
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;

/// Decides whether a failed network operation is attempted again, and when.
pub trait RetryPolicy: Send + Sync {
    /// Total number of attempts allowed for one operation.
    fn max_retries(&self) -> u32;
    fn should_retry(&self, attempt: u32, error: &AppError) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
}

/// Errors worth another attempt: transient HTTP statuses, transport-level
/// failures and the two synthetic short/invalid response conditions.
pub fn is_transient(error: &AppError) -> bool {
    match error {
        AppError::HttpError(status) => constants::network::RETRYABLE_STATUS_CODES.contains(status),
        AppError::InvalidResponse | AppError::FileTooSmall(_) => true,
        AppError::Network(err)
        | AppError::NetworkMiddleware(reqwest_middleware::Error::Reqwest(err)) => {
            if let Some(status) = err.status() {
                return constants::network::RETRYABLE_STATUS_CODES.contains(&status.as_u16());
            }
            err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
        }
        _ => false,
    }
}

/// `base_delay * 2^attempt`, attempts counted from zero.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(
            constants::network::DEFAULT_MAX_RETRIES,
            Duration::from_secs(constants::network::DEFAULT_RETRY_BASE_DELAY_SECS),
        )
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
        attempt + 1 < self.max_retries && is_transient(error)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Explicit delay table; the last entry is reused once the table runs out.
#[derive(Debug, Clone)]
pub struct FixedDelayPolicy {
    max_retries: u32,
    delays: Vec<Duration>,
}

impl FixedDelayPolicy {
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delays,
        }
    }
}

impl RetryPolicy for FixedDelayPolicy {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
        attempt + 1 < self.max_retries && is_transient(error)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.delays
            .get(attempt as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Runs `op` until it succeeds, the policy gives up, or `cancel` fires.
///
/// Each attempt is a fresh future; the backoff sleep doubles as a
/// cancellation checkpoint.
pub async fn run_with_retry<T, F, Fut>(
    policy: &dyn RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            res = op(attempt) => res,
        };
        match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", label, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    label,
                    attempt + 1,
                    policy.max_retries(),
                    e,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed after {} attempt(s): {}", label, attempt + 1, e);
                return Err(e);
            }
        }
    }
}
