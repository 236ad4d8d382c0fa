//! Credential providers for outbound Prediction API calls.
//!
//! A [`CredentialProvider`] does two things: attach a freshness-checked
//! authorization token to an outgoing request, and decide, when a call
//! fails, whether the failure is authentication-related and resolvable by
//! refreshing the token. The retry loop consults it before the backoff
//! policy (see [`crate::retry`]).
//!
//! Two implementations are provided: [`OauthCredential`] for the
//! refresh-token flow the hosted service expects, and [`StaticToken`] for
//! fixed API-key style deployments and tests.

use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

/// Refresh the token this long before its advertised expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint returned {status}")]
    RefreshRejected { status: StatusCode },
    #[error("token refresh request failed: {0}")]
    RefreshTransport(#[from] reqwest::Error),
}

/// Attaches proof-of-identity to outbound calls and can refresh that proof
/// when it expires.
///
/// Implementations own their token cache and synchronize it internally; the
/// retry loop only ever takes shared references.
pub trait CredentialProvider: Send + Sync {
    /// Attach the current authorization token to an outgoing request,
    /// refreshing it first if it is stale.
    fn authorize(&self, request: RequestBuilder)
    -> BoxFuture<'_, Result<RequestBuilder, AuthError>>;

    /// Given a failed response status, refresh credentials if the failure is
    /// authentication-related. Returns `true` when the failure was handled
    /// and the call should be retried immediately, with no backoff.
    fn handle_auth_failure(&self, status: StatusCode) -> BoxFuture<'_, bool>;
}

// ============================================================================
// Static token
// ============================================================================

/// A fixed bearer token. Never refreshes; auth failures always fall through
/// to the backoff decision.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticToken {
    fn authorize(
        &self,
        request: RequestBuilder,
    ) -> BoxFuture<'_, Result<RequestBuilder, AuthError>> {
        let request = request.bearer_auth(&self.token);
        Box::pin(std::future::ready(Ok(request)))
    }

    fn handle_auth_failure(&self, _status: StatusCode) -> BoxFuture<'_, bool> {
        Box::pin(std::future::ready(false))
    }
}

// ============================================================================
// OAuth refresh-token credential
// ============================================================================

/// Settings for the OAuth refresh-token flow.
#[derive(Debug, Clone)]
pub struct OauthSettings {
    pub token_uri: Url,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug)]
struct TokenState {
    access_token: String,
    expires_at: Instant,
}

impl TokenState {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_SKEW < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 credential with an internally synchronized token cache.
///
/// The cache is guarded by an async mutex held across the refresh request,
/// so concurrent calls that find a stale token trigger a single refresh
/// rather than a stampede.
pub struct OauthCredential {
    http: reqwest::Client,
    settings: OauthSettings,
    state: Mutex<Option<TokenState>>,
}

impl OauthCredential {
    #[must_use]
    pub fn new(http: reqwest::Client, settings: OauthSettings) -> Self {
        Self {
            http,
            settings,
            state: Mutex::new(None),
        }
    }

    /// Current access token, refreshing if missing or within the expiry skew.
    async fn fresh_token(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.as_ref()
            && token.is_fresh()
        {
            return Ok(token.access_token.clone());
        }
        let token = self.refresh().await?;
        let access_token = token.access_token.clone();
        *state = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token and mint a new one. Returns false if the token
    /// endpoint declined, leaving the original call failure to propagate.
    async fn refresh_after_failure(&self) -> bool {
        let mut state = self.state.lock().await;
        match self.refresh().await {
            Ok(token) => {
                *state = Some(token);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Credential refresh failed");
                *state = None;
                false
            }
        }
    }

    async fn refresh(&self) -> Result<TokenState, AuthError> {
        let response = self
            .http
            .post(self.settings.token_uri.clone())
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("refresh_token", self.settings.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::RefreshRejected { status });
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "Refreshed access token");
        Ok(TokenState {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

impl CredentialProvider for OauthCredential {
    fn authorize(
        &self,
        request: RequestBuilder,
    ) -> BoxFuture<'_, Result<RequestBuilder, AuthError>> {
        Box::pin(async move {
            let token = self.fresh_token().await?;
            Ok(request.bearer_auth(token))
        })
    }

    fn handle_auth_failure(&self, status: StatusCode) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if status != StatusCode::UNAUTHORIZED {
                return false;
            }
            self.refresh_after_failure().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> OauthSettings {
        OauthSettings {
            token_uri: Url::parse(&format!("{}/token", server.uri())).unwrap(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    #[tokio::test]
    async fn oauth_credential_caches_token_across_calls() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = OauthCredential::new(reqwest::Client::new(), settings(&server));

        assert_eq!(credential.fresh_token().await.unwrap(), "tok-1");
        // Second call is served from the cache; the mock's expect(1) would
        // trip on a second refresh.
        assert_eq!(credential.fresh_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn oauth_credential_refreshes_expired_token() {
        let server = MockServer::start().await;
        let mints = AtomicU32::new(0);

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(move |_: &wiremock::Request| {
                let n = mints.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    // expires_in below the refresh skew, so the token is
                    // already considered stale on the next call.
                    "access_token": format!("tok-{n}"),
                    "expires_in": 10,
                    "token_type": "Bearer"
                }))
            })
            .expect(2)
            .mount(&server)
            .await;

        let credential = OauthCredential::new(reqwest::Client::new(), settings(&server));

        assert_eq!(credential.fresh_token().await.unwrap(), "tok-0");
        assert_eq!(credential.fresh_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn auth_failure_handled_only_for_unauthorized() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let credential = OauthCredential::new(reqwest::Client::new(), settings(&server));

        assert!(
            credential
                .handle_auth_failure(StatusCode::UNAUTHORIZED)
                .await
        );
        assert!(
            !credential
                .handle_auth_failure(StatusCode::SERVICE_UNAVAILABLE)
                .await
        );
        assert!(!credential.handle_auth_failure(StatusCode::FORBIDDEN).await);
    }

    #[tokio::test]
    async fn failed_refresh_reports_unhandled() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let credential = OauthCredential::new(reqwest::Client::new(), settings(&server));

        // The original call failure must fall through, not be masked.
        assert!(
            !credential
                .handle_auth_failure(StatusCode::UNAUTHORIZED)
                .await
        );

        match credential.fresh_token().await {
            Err(AuthError::RefreshRejected { status }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
            }
            other => panic!("expected RefreshRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn static_token_never_handles_failures() {
        let credential = StaticToken::new("key");
        assert!(!credential.handle_auth_failure(StatusCode::UNAUTHORIZED).await);
    }
}
