//! Prediction service client with resilient outbound calls.
//!
//! # Architecture
//!
//! The crate is organized around one resilient call path:
//!
//! - [`client`] - Typed Prediction API bindings ([`PredictionClient`])
//! - [`retry`] - The retry loop: credential refresh first, bounded
//!   exponential backoff second, original failure propagated otherwise
//! - [`auth`] - Credential providers (OAuth refresh-token flow, static token)
//!
//! Every operation the client exposes, from predict calls to training
//! kickoff and training status, goes through
//! [`retry::send_with_retry`], so authorization attachment, the response
//! timeout ceiling, and the retry decision chain apply uniformly.
//!
//! # Construction
//!
//! [`PredictionClient::builder`] validates its configuration at build time:
//! a missing credential provider or project id is a configuration error and
//! fails before any call is attempted. The built client is passed explicitly
//! to consumers; only the bare [`reqwest::Client`] lives in a process-wide
//! [`OnceLock`] so connection pools are shared.
//!
//! # Error Handling
//!
//! Failures are never re-classified: a non-2xx response surfaces with its
//! original status and body, a transport error surfaces as the original
//! [`reqwest::Error`]. See [`client::PredictionError`].

pub mod auth;
pub mod client;
pub mod retry;

use std::sync::OnceLock;
use std::time::Duration;

pub use guestbook_types;

pub use auth::{CredentialProvider, OauthCredential, OauthSettings, StaticToken};
pub use client::{BuildError, PredictionClient, PredictionClientBuilder, PredictionError};
pub use retry::{RetryConfig, RetryOutcome, Sleeper, TokioSleeper};

const USER_AGENT: &str = concat!("guestbook-prediction/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;

/// Shared process-wide HTTP client.
///
/// Built once, lazily; connection pools and TLS state are reused across all
/// outbound calls (prediction requests and token refreshes alike).
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!(
                "Failed to build hardened HTTP client: {e}. Attempting minimal hardened fallback."
            );
            reqwest::Client::builder()
                .https_only(true)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("Minimal hardened HTTP client must build; cannot proceed without TLS")
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(true)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
}
