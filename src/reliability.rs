//! Retry executor: bounded exponential backoff with jitter, per-call timeout,
//! cooperative cancellation, and metrics emission.

use crate::api::{Candidate, RetryPolicy};
use crate::error::{Classification, GenerationError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for one failed attempt. Lives only while a candidate runs.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt_number: u32,
    pub last_error: GenerationError,
    pub classification: Classification,
}

impl RetryAttempt {
    fn new(attempt_number: u32, last_error: GenerationError) -> Self {
        let classification = last_error.classification();
        Self {
            attempt_number,
            last_error,
            classification,
        }
    }
}

/// Runs one upstream operation under a [`RetryPolicy`].
///
/// Fatal errors are returned after the first attempt. Transient errors are
/// retried after `base_delay_ms * 2^(attempt-1) + random(0..jitter_ms)` until
/// `max_attempts` is reached, at which point
/// [`GenerationError::RetriesExhausted`] wraps the last upstream message.
/// Both the call and the backoff sleep abort as soon as the cancellation
/// token fires.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            call_timeout: None,
        }
    }

    /// Treat a single call running longer than `timeout` as a transient
    /// failure.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn jitter_ms(&self) -> u64 {
        if self.policy.jitter_ms == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..self.policy.jitter_ms)
    }

    /// Execute `operation`, passing it the 1-based attempt number.
    pub async fn execute<F, Fut, T>(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let call = operation(attempt);

            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                res = async {
                    match self.call_timeout {
                        Some(timeout) => tokio::time::timeout(timeout, call)
                            .await
                            .unwrap_or(Err(GenerationError::Timeout)),
                        None => call.await,
                    }
                } => res,
            };

            let failed = match res {
                Ok(val) => return Ok(val),
                Err(e) => RetryAttempt::new(attempt, e),
            };

            match failed.classification {
                Classification::Fatal => {
                    tracing::debug!(
                        candidate = %candidate,
                        attempt = failed.attempt_number,
                        error = %failed.last_error,
                        "Fatal error; not retrying"
                    );
                    return Err(failed.last_error);
                }
                Classification::Transient if failed.attempt_number < max_attempts => {
                    let backoff = self.policy.backoff(failed.attempt_number, self.jitter_ms());
                    tracing::warn!(
                        candidate = %candidate,
                        attempt = failed.attempt_number,
                        backoff_ms = backoff.as_millis(),
                        error = %failed.last_error,
                        "Retrying generation call"
                    );
                    metrics::counter!(
                        "generation.retries",
                        "provider" => candidate.provider.as_str()
                    )
                    .increment(1);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Classification::Transient => {
                    tracing::warn!(
                        candidate = %candidate,
                        attempts = failed.attempt_number,
                        error = %failed.last_error,
                        "Retries exhausted"
                    );
                    return Err(GenerationError::RetriesExhausted {
                        attempts: failed.attempt_number,
                        rate_limited: failed.last_error.is_rate_limited(),
                        message: failed.last_error.upstream_message(),
                    });
                }
            }
        }
    }
}
