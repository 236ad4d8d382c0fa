//! HTTP endpoints for the guestbook.
//!
//! Four routes, mirroring the original servlet surface:
//!
//! - `POST /guestbook/{name}/sign` - classify a post and persist it
//! - `GET  /guestbook/{name}` - recent greetings as JSON
//! - `POST /model/train` - kick off language-model training
//! - `GET  /model/status` - training status as plain text
//!
//! Handlers translate failures to HTTP statuses (bad input 400, upstream
//! prediction failure 502, storage failure 500) and log the underlying
//! error; the error itself is not re-shaped beyond that.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use guestbook_prediction::{PredictionClient, PredictionError};
use guestbook_store::GreetingStore;
use guestbook_types::{Greeting, GuestbookName};

/// How many greetings the listing endpoint returns.
const RECENT_LIMIT: u32 = 20;

/// Shared state injected into handlers.
///
/// The prediction client is passed explicitly rather than looked up through
/// any process-global; the store is a single SQLite connection behind a
/// mutex, which is plenty for a demonstration app.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<PredictionClient>,
    pub store: Arc<Mutex<GreetingStore>>,
    pub language_model: String,
    pub training_data: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("language_model", &self.language_model)
            .field("training_data", &self.training_data)
            .finish_non_exhaustive()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/guestbook/{name}/sign", post(sign_guestbook))
        .route("/guestbook/{name}", get(list_greetings))
        .route("/model/train", post(train_model))
        .route("/model/status", get(model_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

enum AppError {
    BadRequest(String),
    Upstream(PredictionError),
    Storage(anyhow::Error),
}

impl From<PredictionError> for AppError {
    fn from(e: PredictionError) -> Self {
        Self::Upstream(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            Self::Upstream(e) => {
                tracing::error!(error = %e, "Prediction call failed");
                (StatusCode::BAD_GATEWAY, "prediction service unavailable").into_response()
            }
            Self::Storage(e) => {
                tracing::error!(error = %e, "Greeting store failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage failure").into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignForm {
    content: String,
    author: Option<String>,
}

/// Create a new guestbook post.
///
/// Classifies the post's sentiment (hosted model) and language (trained
/// model), persists the greeting, and redirects back to the guestbook view.
async fn sign_guestbook(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Form(form): Form<SignForm>,
) -> Result<Redirect, AppError> {
    let guestbook =
        GuestbookName::new(name.as_str()).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if form.content.trim().is_empty() {
        return Err(AppError::BadRequest(
            "greeting content must not be empty".to_string(),
        ));
    }

    let sentiment = state.client.sentiment(&form.content).await?;
    let language = state.client.language(&form.content).await?;

    let greeting = Greeting::new(guestbook, form.author, form.content, sentiment, language)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let store = state
        .store
        .lock()
        .map_err(|_| AppError::Storage(anyhow::anyhow!("greeting store lock poisoned")))?;
    store.insert(&greeting)?;

    tracing::info!(
        guestbook = %greeting.guestbook,
        sentiment = ?greeting.sentiment,
        language = %greeting.language,
        "Stored greeting"
    );

    Ok(Redirect::to(&format!("/guestbook/{name}")))
}

/// Recent greetings of a guestbook, newest first.
async fn list_greetings(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Greeting>>, AppError> {
    let guestbook =
        GuestbookName::new(name.as_str()).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let store = state
        .store
        .lock()
        .map_err(|_| AppError::Storage(anyhow::anyhow!("greeting store lock poisoned")))?;
    let greetings = store.recent(&guestbook, RECENT_LIMIT)?;
    Ok(Json(greetings))
}

/// Kick off (re)training of the language model, then redirect to the status
/// view.
async fn train_model(State(state): State<AppState>) -> Result<Redirect, AppError> {
    state
        .client
        .train(&state.language_model, &state.training_data)
        .await?;
    tracing::info!(model = %state.language_model, "Started language model training");
    Ok(Redirect::to("/model/status"))
}

/// Current training status of the language model, as plain text.
async fn model_status(State(state): State<AppState>) -> Result<String, AppError> {
    let status = state.client.training_status(&state.language_model).await?;
    Ok(status)
}
