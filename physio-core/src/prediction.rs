//! Pain prediction client
//!
//! Provides a `PredictionBackend` trait and an HTTP implementation that posts
//! the uploaded sensor file to the external inference service.
//!
//! The service answers with a JSON object holding a sequence of class labels,
//! one per analysed window of the recording. Only the last label is the
//! prediction for the session.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::PredictionConfig;
use crate::models::SensorPayload;

// ============================================================================
// PredictionBackend trait
// ============================================================================

/// Abstraction over pain prediction providers.
#[async_trait]
pub trait PredictionBackend: Send + Sync {
    /// Submit a sensor recording and return the predicted label sequence.
    async fn predict(&self, payload: &SensorPayload) -> Result<PredictionResult, PredictionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Result and error types
// ============================================================================

/// Ordered class labels returned by the service. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    classes: Vec<f64>,
    last: f64,
}

impl PredictionResult {
    pub fn from_classes(classes: Vec<f64>) -> Result<Self, PredictionError> {
        let last = *classes.last().ok_or(PredictionError::EmptyResult)?;
        Ok(Self { classes, last })
    }

    /// The label for the final window of the recording.
    pub fn final_label(&self) -> f64 {
        self.last
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("No sensor file attached")]
    MissingPayload,

    #[error("Prediction service unreachable after {attempts} attempt(s): {message}")]
    Unreachable { attempts: usize, message: String },

    #[error("Prediction service rejected the file ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed prediction response: {0}")]
    MalformedResponse(String),

    #[error("Prediction service returned an empty label sequence")]
    EmptyResult,

    #[error("Invalid prediction endpoint: {0}")]
    InvalidEndpoint(String),
}

impl PredictionError {
    /// Stable kind name for logs and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingPayload => "missing_payload",
            Self::Unreachable { .. } => "unreachable",
            Self::Rejected { .. } => "rejected",
            Self::MalformedResponse(_) => "malformed_response",
            Self::EmptyResult => "empty_result",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }

    /// The user may retry without touching the rest of the draft.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidEndpoint(_))
    }
}

/// Create the configured backend.
pub fn create_backend(config: &PredictionConfig) -> Result<Box<dyn PredictionBackend>, PredictionError> {
    Ok(Box::new(HttpPredictionClient::new(config.clone())?))
}

// ============================================================================
// HttpPredictionClient
// ============================================================================

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    error: Option<String>,
}

/// One failed attempt. Transient failures are retried, the rest end the call.
#[derive(Debug)]
enum Attempt {
    Transient(String),
    Final(PredictionError),
}

impl Attempt {
    fn is_transient(&self) -> bool {
        matches!(self, Attempt::Transient(_))
    }
}

/// Calls the inference service over HTTP with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpPredictionClient {
    client: Client,
    config: PredictionConfig,
}

impl HttpPredictionClient {
    pub fn new(config: PredictionConfig) -> Result<Self, PredictionError> {
        if reqwest::Url::parse(&config.endpoint).is_err() {
            return Err(PredictionError::InvalidEndpoint(config.endpoint.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PredictionError::InvalidEndpoint(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn predict_once(&self, payload: &SensorPayload) -> Result<PredictionResult, Attempt> {
        let part = Part::bytes(payload.bytes.clone())
            .file_name(payload.file_name.clone())
            .mime_str(payload.format.mime_type())
            .map_err(|e| Attempt::Final(PredictionError::MalformedResponse(e.to_string())))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ServiceErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());

            tracing::warn!(status = status.as_u16(), message = %message, "Prediction service error");

            return Err(if is_transient_status(status) {
                Attempt::Transient(format!("HTTP {}: {}", status.as_u16(), message))
            } else {
                Attempt::Final(PredictionError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            });
        }

        parse_prediction(&body, &self.config.response_field).map_err(Attempt::Final)
    }
}

#[async_trait]
impl PredictionBackend for HttpPredictionClient {
    async fn predict(&self, payload: &SensorPayload) -> Result<PredictionResult, PredictionError> {
        if payload.is_empty() {
            return Err(PredictionError::MissingPayload);
        }

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let attempts = self.config.max_retries + 1;
        let result = RetryIf::spawn(
            retry_strategy,
            || self.predict_once(payload),
            |e: &Attempt| e.is_transient(),
        )
        .await;

        match result {
            Ok(prediction) => {
                tracing::info!(
                    file = %payload.file_name,
                    windows = prediction.classes().len(),
                    label = prediction.final_label(),
                    "Pain prediction received"
                );
                Ok(prediction)
            }
            Err(Attempt::Transient(message)) => {
                tracing::error!(attempts, error = %message, "All prediction attempts failed");
                Err(PredictionError::Unreachable { attempts, message })
            }
            Err(Attempt::Final(e)) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Gateway and throttling responses. A plain 500 is the service failing to
/// process the file and is final.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Parse the service body into a [`PredictionResult`].
pub fn parse_prediction(body: &[u8], field: &str) -> Result<PredictionResult, PredictionError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| PredictionError::MalformedResponse(format!("body is not JSON: {}", e)))?;

    let sequence = value
        .get(field)
        .ok_or_else(|| PredictionError::MalformedResponse(format!("field '{}' is absent", field)))?
        .as_array()
        .ok_or_else(|| {
            PredictionError::MalformedResponse(format!("field '{}' is not a sequence", field))
        })?;

    let classes = sequence
        .iter()
        .map(|label| {
            label.as_f64().ok_or_else(|| {
                PredictionError::MalformedResponse(format!("label {} is not numeric", label))
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    PredictionResult::from_classes(classes)
}

// ============================================================================
// TESTS
// ============================================================================
