//! Typed bindings for the hosted prediction service.
//!
//! [`PredictionClient`] owns the pieces every call needs (the shared HTTP
//! client, the credential provider, the retry configuration and the wait
//! primitive) and routes each operation through
//! [`send_with_retry`](crate::retry::send_with_retry). It is constructed once
//! at startup via [`PredictionClient::builder`] and passed explicitly to
//! consumers; construction fails fast when no credential provider was
//! supplied.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use guestbook_types::Sentiment;

use crate::auth::{AuthError, CredentialProvider};
use crate::retry::{RetryConfig, RetryOutcome, Sleeper, TokioSleeper, send_with_retry};

/// Canonical base URL of the prediction service.
pub const PREDICTION_API_BASE_URL: &str = "https://www.googleapis.com/prediction/v1.6";

/// Project that hosts the shared sentiment sample model.
pub const HOSTED_SAMPLE_PROJECT: &str = "414649711441";

/// Name of the hosted sentiment sample model.
pub const SENTIMENT_MODEL: &str = "sample.sentiment";

#[derive(Debug, Error)]
pub enum PredictionError {
    /// Non-2xx response the retry layer declined to retry. Carries the
    /// original status and body untouched.
    #[error("prediction API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    /// Transport failure after retries were exhausted.
    #[error("connection error after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    /// Transport failure that was never retry-eligible.
    #[error("request error: {0}")]
    Request(reqwest::Error),
    #[error(transparent)]
    Credential(#[from] AuthError),
    /// 2xx response whose body could not be decoded.
    #[error("malformed prediction response: {0}")]
    Malformed(reqwest::Error),
    /// Classifier answered without an output label.
    #[error("prediction response carried no output label")]
    MissingLabel,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("prediction client requires a credential provider")]
    MissingCredential,
    #[error("prediction client requires a project id")]
    MissingProjectId,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    input: CsvInstance<'a>,
}

#[derive(Debug, Serialize)]
struct CsvInstance<'a> {
    #[serde(rename = "csvInstance")]
    csv_instance: Vec<&'a str>,
}

impl<'a> PredictionInput<'a> {
    fn single(text: &'a str) -> Self {
        Self {
            input: CsvInstance {
                csv_instance: vec![text],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictionOutput {
    #[serde(rename = "outputLabel")]
    output_label: Option<String>,
}

#[derive(Debug, Serialize)]
struct TrainingRequest<'a> {
    id: &'a str,
    #[serde(rename = "storageDataLocation")]
    storage_data_location: &'a str,
}

#[derive(Debug, Deserialize)]
struct TrainedModelStatus {
    #[serde(rename = "trainingStatus")]
    training_status: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Client for the hosted prediction service.
pub struct PredictionClient {
    http: reqwest::Client,
    credential: Arc<dyn CredentialProvider>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryConfig,
    base_url: String,
    project_id: String,
    hosted_project: String,
    sentiment_model: String,
    language_model: String,
}

impl std::fmt::Debug for PredictionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("sentiment_model", &self.sentiment_model)
            .field("language_model", &self.language_model)
            .finish_non_exhaustive()
    }
}

impl PredictionClient {
    #[must_use]
    pub fn builder() -> PredictionClientBuilder {
        PredictionClientBuilder::default()
    }

    /// Classify the sentiment of a post with the hosted sample model.
    pub async fn sentiment(&self, content: &str) -> Result<Sentiment, PredictionError> {
        let label = self.predict_hosted(&self.sentiment_model, content).await?;
        Ok(Sentiment::from_label(&label))
    }

    /// Detect the language of a post with the trained language model.
    pub async fn language(&self, content: &str) -> Result<String, PredictionError> {
        self.predict_trained(&self.language_model, content).await
    }

    /// Hosted-model predict; returns the raw output label.
    pub async fn predict_hosted(
        &self,
        model: &str,
        content: &str,
    ) -> Result<String, PredictionError> {
        let url = format!(
            "{}/projects/{}/hostedmodels/{}/predict",
            self.base_url, self.hosted_project, model
        );
        self.predict_at(&url, content).await
    }

    /// Trained-model predict; returns the raw output label.
    pub async fn predict_trained(
        &self,
        model_id: &str,
        content: &str,
    ) -> Result<String, PredictionError> {
        let url = format!(
            "{}/projects/{}/trainedmodels/{}/predict",
            self.base_url, self.project_id, model_id
        );
        self.predict_at(&url, content).await
    }

    /// Start (re)training the language model from its storage location.
    ///
    /// Fire-and-forget on the service side: a 2xx acknowledges that training
    /// started, progress is observed via [`Self::training_status`].
    pub async fn train(
        &self,
        model_id: &str,
        storage_data_location: &str,
    ) -> Result<(), PredictionError> {
        let url = format!("{}/projects/{}/trainedmodels", self.base_url, self.project_id);
        let body = TrainingRequest {
            id: model_id,
            storage_data_location,
        };

        let outcome = send_with_retry(
            || self.http.post(&url).json(&body),
            self.credential.as_ref(),
            self.sleeper.as_ref(),
            &self.retry,
        )
        .await;

        resolve(outcome).await.map(|_| ())
    }

    /// Current training status of a trained model, e.g. `RUNNING` or `DONE`.
    pub async fn training_status(&self, model_id: &str) -> Result<String, PredictionError> {
        let url = format!(
            "{}/projects/{}/trainedmodels/{}",
            self.base_url, self.project_id, model_id
        );

        let outcome = send_with_retry(
            || self.http.get(&url),
            self.credential.as_ref(),
            self.sleeper.as_ref(),
            &self.retry,
        )
        .await;

        let response = resolve(outcome).await?;
        let status: TrainedModelStatus =
            response.json().await.map_err(PredictionError::Malformed)?;
        status.training_status.ok_or(PredictionError::MissingLabel)
    }

    async fn predict_at(&self, url: &str, content: &str) -> Result<String, PredictionError> {
        let body = PredictionInput::single(content);

        let outcome = send_with_retry(
            || self.http.post(url).json(&body),
            self.credential.as_ref(),
            self.sleeper.as_ref(),
            &self.retry,
        )
        .await;

        let response = resolve(outcome).await?;
        let output: PredictionOutput = response.json().await.map_err(PredictionError::Malformed)?;
        output.output_label.ok_or(PredictionError::MissingLabel)
    }
}

/// Map a retry outcome to a result, preserving the original failure.
async fn resolve(outcome: RetryOutcome) -> Result<reqwest::Response, PredictionError> {
    match outcome {
        RetryOutcome::Success(response) => Ok(response),
        RetryOutcome::HttpError(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PredictionError::Api { status, body })
        }
        RetryOutcome::ConnectionError { attempts, source } => {
            Err(PredictionError::Connection { attempts, source })
        }
        RetryOutcome::NonRetryable(e) => Err(PredictionError::Request(e)),
        RetryOutcome::CredentialError(e) => Err(PredictionError::Credential(e)),
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`PredictionClient`].
///
/// The credential provider and project id have no usable defaults;
/// [`build`](Self::build) fails immediately when either is unset, before any
/// call is attempted.
#[derive(Default)]
pub struct PredictionClientBuilder {
    http: Option<reqwest::Client>,
    credential: Option<Arc<dyn CredentialProvider>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    retry: Option<RetryConfig>,
    base_url: Option<String>,
    project_id: Option<String>,
    hosted_project: Option<String>,
    sentiment_model: Option<String>,
    language_model: Option<String>,
}

impl PredictionClientBuilder {
    #[must_use]
    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn credential(mut self, credential: Arc<dyn CredentialProvider>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Substitute the wait primitive. Tests inject an instant sleeper here.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Override the service base URL (tests point this at a local server).
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn hosted_project(mut self, hosted_project: impl Into<String>) -> Self {
        self.hosted_project = Some(hosted_project.into());
        self
    }

    #[must_use]
    pub fn sentiment_model(mut self, model: impl Into<String>) -> Self {
        self.sentiment_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn language_model(mut self, model_id: impl Into<String>) -> Self {
        self.language_model = Some(model_id.into());
        self
    }

    pub fn build(self) -> Result<PredictionClient, BuildError> {
        let credential = self.credential.ok_or(BuildError::MissingCredential)?;
        let project_id = self.project_id.ok_or(BuildError::MissingProjectId)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| PREDICTION_API_BASE_URL.to_string());

        Ok(PredictionClient {
            http: self.http.unwrap_or_else(|| crate::http_client().clone()),
            credential,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            retry: self.retry.unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            hosted_project: self
                .hosted_project
                .unwrap_or_else(|| HOSTED_SAMPLE_PROJECT.to_string()),
            sentiment_model: self
                .sentiment_model
                .unwrap_or_else(|| SENTIMENT_MODEL.to_string()),
            language_model: self.language_model.unwrap_or_else(|| "language".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::retry::RecordingSleeper;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> PredictionClient {
        PredictionClient::builder()
            // The shared client is https-only; the mock server is plain http.
            .http(reqwest::Client::new())
            .base_url(server.uri())
            .credential(Arc::new(StaticToken::new("key")))
            .sleeper(Arc::new(RecordingSleeper::new()))
            .project_id("demo-project")
            .language_model("language-id")
            .retry(RetryConfig {
                initial_interval: Duration::from_millis(1),
                max_elapsed: Duration::from_millis(4),
                randomization_factor: 0.0,
                ..RetryConfig::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn build_without_credential_fails_fast() {
        let result = PredictionClient::builder().project_id("demo").build();
        assert!(matches!(result, Err(BuildError::MissingCredential)));
    }

    #[test]
    fn build_without_project_fails_fast() {
        let result = PredictionClient::builder()
            .credential(Arc::new(StaticToken::new("key")))
            .build();
        assert!(matches!(result, Err(BuildError::MissingProjectId)));
    }

    #[tokio::test]
    async fn sentiment_maps_positive_label() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!(
                "/projects/{HOSTED_SAMPLE_PROJECT}/hostedmodels/{SENTIMENT_MODEL}/predict"
            )))
            .and(header("authorization", "Bearer key"))
            .and(body_json(serde_json::json!({
                "input": { "csvInstance": ["what a lovely day"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "outputLabel": "positive"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let sentiment = client.sentiment("what a lovely day").await.unwrap();
        assert!(sentiment.is_positive());
    }

    #[tokio::test]
    async fn language_uses_trained_model_route() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/demo-project/trainedmodels/language-id/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "outputLabel": "english"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        assert_eq!(client.language("hello there").await.unwrap(), "english");
    }

    #[tokio::test]
    async fn train_posts_training_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/demo-project/trainedmodels"))
            .and(body_json(serde_json::json!({
                "id": "language-id",
                "storageDataLocation": "bucket/language_id.txt"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "language-id"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        client
            .train("language-id", "bucket/language_id.txt")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn training_status_returns_raw_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/demo-project/trainedmodels/language-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "language-id",
                "trainingStatus": "RUNNING"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        assert_eq!(client.training_status("language-id").await.unwrap(), "RUNNING");
    }

    #[tokio::test]
    async fn api_failure_surfaces_original_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/demo-project/trainedmodels/language-id"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        match client.training_status("language-id").await {
            Err(PredictionError::Api { status, body }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "no such model");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_label_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/demo-project/trainedmodels/language-id/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "outputMulti": []
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        assert!(matches!(
            client.language("hello").await,
            Err(PredictionError::MissingLabel)
        ));
    }
}
