//! Resilient outbound HTTP calls: credential refresh first, backoff second.
//!
//! Every Prediction API request goes through [`send_with_retry`]. Before each
//! attempt the configured [`CredentialProvider`] attaches a freshness-checked
//! authorization token, and the attempt carries a bounded response timeout so
//! a hung endpoint cannot block forever.
//!
//! # Failure decision chain
//!
//! On a non-2xx response, two independent strategies are consulted in order,
//! first match wins:
//!
//! 1. The credential layer. If it recognizes the failure as
//!    authentication-related and resolves it (token refresh), the call is
//!    retried immediately with no delay. An expired token is not a capacity
//!    signal, so the backoff policy is not advanced.
//! 2. The backoff policy. Transient statuses are retried with exponentially
//!    growing delays until the cumulative retry budget is exhausted.
//!
//! If neither accepts, the original failure is returned to the caller
//! unmodified. Transport-level errors skip the credential stage (there is no
//! response for it to interpret) and go straight to a dedicated backoff
//! policy, mirroring the split between response handling and IO-error
//! handling in the upstream API client this wraps.
//!
//! The wait primitive is the injectable [`Sleeper`] trait, so tests exercise
//! the full retry loop with zero real elapsed time.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::auth::CredentialProvider;

/// Retry configuration.
///
/// Defaults follow the exponential-backoff parameters of the upstream API
/// client library: 500ms initial interval growing by 1.5x per retry, +/-50%
/// randomization, 60s interval ceiling, and a 15 minute cumulative budget.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first backoff retry.
    pub initial_interval: Duration,
    /// Growth factor applied to the interval after each backoff retry.
    pub multiplier: f64,
    /// Randomization factor (0.5 = actual delay in [0.5x, 1.5x] of interval).
    pub randomization_factor: f64,
    /// Upper bound on a single inter-attempt delay.
    pub max_interval: Duration,
    /// Cumulative delay budget; once exceeded the policy signals "stop".
    pub max_elapsed: Duration,
    /// Per-attempt wait-for-response ceiling applied to every request.
    pub response_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(15 * 60),
            response_timeout: Duration::from_secs(2 * 60),
        }
    }
}

/// Per-call exponential backoff state.
///
/// A fresh instance is constructed for every call, so the policy is always
/// "reset" at call start. Elapsed time is accounted as the sum of delays the
/// policy has handed out, which keeps the budget deterministic under an
/// instant test [`Sleeper`].
#[derive(Debug)]
pub struct ExponentialBackoff {
    current_interval: Duration,
    elapsed: Duration,
    multiplier: f64,
    randomization_factor: f64,
    max_interval: Duration,
    max_elapsed: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            current_interval: config.initial_interval,
            elapsed: Duration::ZERO,
            multiplier: config.multiplier,
            randomization_factor: config.randomization_factor,
            max_interval: config.max_interval,
            max_elapsed: config.max_elapsed,
        }
    }

    /// Next inter-attempt delay, or `None` once the cumulative budget is
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.elapsed >= self.max_elapsed {
            return None;
        }

        // Randomize around the current interval: factor in [1-r, 1+r].
        let spread = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.randomization_factor;
        let delay = self.current_interval.mul_f64(spread.max(0.0));

        self.elapsed += delay;
        self.current_interval = self
            .current_interval
            .mul_f64(self.multiplier)
            .min(self.max_interval);

        Some(delay)
    }
}

/// Injectable wait primitive.
///
/// Production code sleeps on the tokio timer; tests substitute
/// [`RecordingSleeper`] so K retries complete instantly while the requested
/// delays remain observable.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Records every requested delay and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

/// Outcome of a resilient call.
///
/// This is a sum type that structurally distinguishes success from failure,
/// and in every failure variant carries the original response or error
/// unmodified so the caller can apply its own handling.
#[derive(Debug)]
pub enum RetryOutcome {
    /// Request succeeded (2xx status).
    Success(Response),
    /// Non-2xx response that neither the credential layer nor the backoff
    /// policy would retry (or the backoff budget ran out). The response is
    /// provided for error body inspection.
    HttpError(Response),
    /// Transport failure after one or more retries.
    ConnectionError {
        attempts: u32,
        source: reqwest::Error,
    },
    /// Transport failure on the first attempt that cannot be retried.
    NonRetryable(reqwest::Error),
    /// The credential layer could not produce a token to attach.
    CredentialError(crate::auth::AuthError),
}

impl RetryOutcome {
    /// Returns true if this is a successful response.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Cap on credential-refresh retries within one call, so a credential layer
/// that keeps "resolving" a persistent auth failure cannot loop forever.
/// Matches the attempt cap of the upstream API client library.
const MAX_AUTH_RETRIES: u32 = 10;

/// Statuses the backoff policy is willing to retry.
///
/// Anything else is treated as fatal and propagated without a retry attempt.
#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500..=599)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// Send a request with credential attachment and automatic retries.
///
/// `build_request` is called once per attempt; the authorization token is
/// attached after building so a refreshed credential is always picked up by
/// the next attempt. See the module docs for the decision chain.
pub async fn send_with_retry<F>(
    build_request: F,
    credential: &dyn CredentialProvider,
    sleeper: &dyn Sleeper,
    config: &RetryConfig,
) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let mut backoff = ExponentialBackoff::new(config);
    // IO errors get their own policy instance, independent of the response
    // policy, so a mix of transport blips and 5xx responses each consume
    // their own budget.
    let mut io_backoff = ExponentialBackoff::new(config);
    let mut auth_retries: u32 = 0;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let request = build_request().timeout(config.response_timeout);
        let request = match credential.authorize(request).await {
            Ok(request) => request,
            Err(e) => return RetryOutcome::CredentialError(e),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return RetryOutcome::Success(response);
                }

                // Stage 1: the credential layer. A resolved auth failure is
                // retried immediately; it is not a transience signal, so no
                // delay is applied and the backoff policy is not advanced.
                if auth_retries < MAX_AUTH_RETRIES && credential.handle_auth_failure(status).await {
                    auth_retries += 1;
                    tracing::info!(
                        url = %response.url(),
                        status = %status,
                        attempt = attempts,
                        "Retrying after credential refresh"
                    );
                    continue;
                }

                // Stage 2: the backoff policy.
                if is_transient_status(status) {
                    if let Some(delay) = backoff.next_delay() {
                        tracing::info!(
                            url = %response.url(),
                            status = %status,
                            attempt = attempts,
                            delay_ms = delay.as_millis(),
                            "Retrying after backoff"
                        );
                        sleeper.sleep(delay).await;
                        continue;
                    }
                    tracing::warn!(
                        url = %response.url(),
                        status = %status,
                        attempt = attempts,
                        "Retry budget exhausted"
                    );
                }

                return RetryOutcome::HttpError(response);
            }
            Err(e) => {
                if is_retryable_error(&e) {
                    if let Some(delay) = io_backoff.next_delay() {
                        tracing::info!(
                            url = e.url().map_or("<unknown>", |u| u.as_str()),
                            error = %e,
                            attempt = attempts,
                            delay_ms = delay.as_millis(),
                            "Retrying after transport error"
                        );
                        sleeper.sleep(delay).await;
                        continue;
                    }
                    return RetryOutcome::ConnectionError {
                        attempts,
                        source: e,
                    };
                }

                if attempts == 1 {
                    return RetryOutcome::NonRetryable(e);
                }
                return RetryOutcome::ConnectionError {
                    attempts,
                    source: e,
                };
            }
        }
    }
}
