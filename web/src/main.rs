//! Guestbook server - binary entry point.
//!
//! Startup is deliberately fail-fast: configuration is loaded first, then the
//! prediction client is built (which errors immediately if no credential is
//! configured), then the greeting store opens, and only then does the server
//! bind. A misconfigured deployment never reaches the point of accepting
//! requests.

mod routes;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

use guestbook_config::{AuthConfig, GuestbookConfig};
use guestbook_prediction::{
    CredentialProvider, OauthCredential, OauthSettings, PredictionClient, StaticToken, http_client,
};
use guestbook_store::GreetingStore;

use routes::AppState;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("guestbook_web=info,guestbook_prediction=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

/// Build the credential provider the config asks for.
///
/// Supplying neither auth block leaves the client builder without a
/// credential, which it rejects at construction.
fn build_credential(auth: &AuthConfig) -> Result<Option<Arc<dyn CredentialProvider>>> {
    if let Some(oauth) = &auth.oauth {
        if auth.static_token.is_some() {
            bail!("config supplies both a static token and an oauth block; pick one");
        }
        let token_uri = Url::parse(&oauth.token_uri)
            .with_context(|| format!("invalid auth.oauth.token_uri: {}", oauth.token_uri))?;
        let settings = OauthSettings {
            token_uri,
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
            refresh_token: oauth.refresh_token.clone(),
        };
        return Ok(Some(Arc::new(OauthCredential::new(
            http_client().clone(),
            settings,
        ))));
    }
    if let Some(token) = &auth.static_token {
        return Ok(Some(Arc::new(StaticToken::new(token.clone()))));
    }
    Ok(None)
}

fn build_state(config: &GuestbookConfig) -> Result<AppState> {
    let mut builder = PredictionClient::builder()
        .project_id(config.prediction.project_id.clone())
        .language_model(config.prediction.language_model.clone());

    if let Some(credential) = build_credential(&config.auth)? {
        builder = builder.credential(credential);
    }
    if let Some(base_url) = &config.prediction.base_url {
        builder = builder.base_url(base_url.clone());
    }
    if let Some(hosted_project) = &config.prediction.hosted_project {
        builder = builder.hosted_project(hosted_project.clone());
    }
    if let Some(sentiment_model) = &config.prediction.sentiment_model {
        builder = builder.sentiment_model(sentiment_model.clone());
    }

    let client = builder
        .build()
        .context("failed to construct prediction client (is [auth] configured?)")?;

    let store = GreetingStore::open(&config.database.path)?;

    Ok(AppState {
        client: Arc::new(client),
        store: Arc::new(Mutex::new(store)),
        language_model: config.prediction.language_model.clone(),
        training_data: config.prediction.training_data.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GuestbookConfig::load(config_path.as_deref())?;

    let state = build_state(&config)?;
    let app = routes::router(state);

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(addr = %config.server.bind_addr, "Guestbook listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_auth_fails_at_startup_not_at_call_time() {
        let config = GuestbookConfig::default();
        // Defaults carry no credential; the in-memory path is irrelevant
        // because construction fails before the store opens.
        let err = build_state(&config).unwrap_err();
        assert!(err.to_string().contains("prediction client"));
    }

    #[test]
    fn static_token_config_builds() {
        let raw = r#"
            [database]
            path = ":memory:"

            [auth]
            static_token = "test-token"
        "#;
        let config: GuestbookConfig = toml::from_str(raw).unwrap();
        assert!(build_state(&config).is_ok());
    }

    #[test]
    fn conflicting_auth_blocks_are_rejected() {
        let raw = r#"
            [auth]
            static_token = "tok"

            [auth.oauth]
            token_uri = "https://oauth2.example.com/token"
            client_id = "c"
            client_secret = "s"
            refresh_token = "r"
        "#;
        let config: GuestbookConfig = toml::from_str(raw).unwrap();
        assert!(build_credential(&config.auth).is_err());
    }
}
