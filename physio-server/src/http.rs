//! Physio HTTP REST API
//!
//! Axum-based HTTP server for the session pipeline. Runs alongside the optional
//! Unix socket IPC server on port 5000 (configurable).
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`. The inner functions are called
//! directly by the unit tests.
//!
//! Endpoints:
//! - GET  /health                            storage health
//! - GET  /version                           server version info
//! - POST /api/predict                       multipart `file`, returns predicted classes
//! - POST /api/sessions                      multipart session form, creates a session
//! - GET  /api/sessions?patient=<id>         patient history, newest first
//! - GET  /api/sessions/:id                  one session
//! - GET  /api/patients/:id/insights         derived insights
//! - GET  /api/patients/:id/report           PDF progress report
//! - GET  /api/generate-report/:session_id   PDF report named after a session

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::async_trait;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use physio_core::{
    PersistenceError, PhysioError, PredictionError, ReportArtifact, SessionDraft, ValidationError,
};
use physio_ingest::IngestError;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::context::ServiceContext;
use crate::subsystems::pipeline::{
    self, FormError, SessionForm, UploadedFile, FORM_PATIENT, FORM_USER,
};
use crate::subsystems::reports::{self, ReportFailure};

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

/// Multipart part holding the file on `/api/predict`.
pub const PREDICT_FILE_FIELD: &str = "file";

/// Slack on top of the file limit for the other multipart parts.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the Axum router with all endpoints
pub fn build_router(ctx: Arc<ServiceContext>) -> Router {
    let body_limit = ctx.config.ingest.max_file_bytes as usize + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/predict", post(predict_handler))
        .route(
            "/api/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route("/api/sessions/:id", get(get_session_handler))
        .route("/api/patients/:id/insights", get(insights_handler))
        .route("/api/patients/:id/report", get(patient_report_handler))
        .route(
            "/api/generate-report/:session_id",
            get(session_report_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    ctx: Arc<ServiceContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);

    let app = build_router(ctx);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Physio HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs and extractors
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ListSessionsQuery {
    pub patient: Option<String>,
}

/// User id asserted by the upstream auth layer, if any. Tokens are never decoded here.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self(user))
    }
}

type HttpError = (StatusCode, serde_json::Value);

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: queries the store and returns (status_code, json_body).
pub async fn health_inner(ctx: &ServiceContext) -> (StatusCode, serde_json::Value) {
    match ctx.store.health().await {
        Ok(database) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": ctx.store.name(),
                "database": database,
                "predictor": ctx.predictor.name(),
                "socket": ctx.config.service.socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "physio/1",
    })
}

/// Inner predict: runs a transient draft through ingest, prediction and merge.
pub async fn predict_inner(ctx: &ServiceContext, mut form: SessionForm) -> HttpError {
    let Some(upload) = form.files.remove(PREDICT_FILE_FIELD) else {
        return prediction_error(&PredictionError::MissingPayload);
    };

    let mut draft = SessionDraft::new(form.field(FORM_PATIENT).unwrap_or("unassigned"));
    if let Err(e) = ctx
        .ingestor
        .accept(&mut draft, &upload.file_name, upload.bytes)
    {
        return ingest_error(&e);
    }

    match pipeline::request_prediction(&mut draft, ctx.predictor.as_ref()).await {
        Ok(outcome) => (
            StatusCode::OK,
            serde_json::json!({
                "predicted_classes": outcome.result.classes(),
                "pain_level": outcome.result.final_label(),
            }),
        ),
        Err(e) => prediction_error(&e),
    }
}

/// Inner create session: validates the form, optionally predicts, then finalizes.
pub async fn create_session_inner(
    ctx: &ServiceContext,
    identity: &RequestIdentity,
    form: SessionForm,
) -> HttpError {
    let missing = form.missing_fields();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "Missing required fields",
                "missing": missing,
                "status": "error",
            }),
        );
    }

    if let (Some(asserted), Some(submitted)) = (identity.0.as_deref(), form.field(FORM_USER)) {
        if asserted != submitted {
            tracing::warn!(asserted, submitted, "Session submitted for a different user");
            return (
                StatusCode::FORBIDDEN,
                error_json("User does not match the authenticated identity"),
            );
        }
    }

    let mut submission = match form.into_submission(&ctx.ingestor) {
        Ok(s) => s,
        Err(FormError::Validation(e)) => return validation_error(&e),
        Err(FormError::Ingest(e)) => return ingest_error(&e),
    };

    if submission.auto_predict && submission.draft.attachment().is_some() {
        if let Err(e) =
            pipeline::request_prediction(&mut submission.draft, ctx.predictor.as_ref()).await
        {
            return prediction_error(&e);
        }
    }

    match ctx
        .gateway
        .finalize(
            &submission.draft,
            &submission.user_id,
            Some(submission.session_code),
        )
        .await
    {
        Ok(session) => (StatusCode::CREATED, to_json(&session)),
        Err(e) => physio_error(&e),
    }
}

/// Inner list sessions: patient history, newest first.
pub async fn list_sessions_inner(ctx: &ServiceContext, query: ListSessionsQuery) -> HttpError {
    let Some(patient) = query.patient.filter(|p| !p.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            error_json("patient query parameter is required"),
        );
    };

    match ctx.store.list_sessions_for_patient(&patient).await {
        Ok(sessions) => (
            StatusCode::OK,
            serde_json::json!({
                "patient": patient,
                "count": sessions.len(),
                "sessions": sessions,
            }),
        ),
        Err(e) => persistence_error(&e),
    }
}

pub async fn get_session_inner(ctx: &ServiceContext, id: &str) -> HttpError {
    let Ok(id) = Uuid::parse_str(id) else {
        return (StatusCode::BAD_REQUEST, error_json("Invalid session id"));
    };

    match ctx.store.get_session(id).await {
        Ok(Some(session)) => (StatusCode::OK, to_json(&session)),
        Ok(None) => report_failure(&ReportFailure::SessionNotFound(id)),
        Err(e) => persistence_error(&e),
    }
}

pub async fn insights_inner(ctx: &ServiceContext, patient_id: &str) -> HttpError {
    match reports::compile_insights(ctx, patient_id).await {
        Ok(summary) => (StatusCode::OK, to_json(&summary)),
        Err(e) => report_failure(&e),
    }
}

pub async fn patient_report_inner(
    ctx: &ServiceContext,
    patient_id: &str,
) -> std::result::Result<ReportArtifact, HttpError> {
    reports::patient_report(ctx, patient_id)
        .await
        .map_err(|e| report_failure(&e))
}

pub async fn session_report_inner(
    ctx: &ServiceContext,
    session_id: &str,
) -> std::result::Result<ReportArtifact, HttpError> {
    let id = Uuid::parse_str(session_id)
        .map_err(|_| (StatusCode::BAD_REQUEST, error_json("Invalid session id")))?;
    reports::session_report(ctx, id)
        .await
        .map_err(|e| report_failure(&e))
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(ctx): State<Arc<ServiceContext>>) -> impl IntoResponse {
    let (status, body) = health_inner(&ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn predict_handler(
    State(ctx): State<Arc<ServiceContext>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let (status, body) = match read_form(multipart).await {
        Ok(form) => predict_inner(&ctx, form).await,
        Err(e) => e,
    };
    (status, Json(body))
}

pub async fn create_session_handler(
    State(ctx): State<Arc<ServiceContext>>,
    identity: RequestIdentity,
    multipart: Multipart,
) -> impl IntoResponse {
    let (status, body) = match read_form(multipart).await {
        Ok(form) => create_session_inner(&ctx, &identity, form).await,
        Err(e) => e,
    };
    (status, Json(body))
}

pub async fn list_sessions_handler(
    State(ctx): State<Arc<ServiceContext>>,
    Query(query): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let (status, body) = list_sessions_inner(&ctx, query).await;
    (status, Json(body))
}

pub async fn get_session_handler(
    State(ctx): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_session_inner(&ctx, &id).await;
    (status, Json(body))
}

pub async fn insights_handler(
    State(ctx): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = insights_inner(&ctx, &id).await;
    (status, Json(body))
}

pub async fn patient_report_handler(
    State(ctx): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> Response {
    pdf_response(patient_report_inner(&ctx, &id).await)
}

pub async fn session_report_handler(
    State(ctx): State<Arc<ServiceContext>>,
    Path(session_id): Path<String>,
) -> Response {
    pdf_response(session_report_inner(&ctx, &session_id).await)
}

// ============================================================================
// Helpers
// ============================================================================

/// Collect a multipart body into text fields and file parts.
pub async fn read_form(mut multipart: Multipart) -> std::result::Result<SessionForm, HttpError> {
    let mut form = SessionForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read multipart body: {}", e);
                return Err((e.status(), error_json(e.body_text())));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (e.status(), error_json(e.body_text())))?;
                form.files.insert(
                    name,
                    UploadedFile {
                        file_name,
                        bytes: bytes.to_vec(),
                    },
                );
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (e.status(), error_json(e.body_text())))?;
                form.fields.insert(name, text);
            }
        }
    }

    Ok(form)
}

/// PDF bytes with a download disposition, or a JSON error body with no PDF bytes.
pub fn pdf_response(result: std::result::Result<ReportArtifact, HttpError>) -> Response {
    match result {
        Ok(artifact) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, artifact.content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    attachment_disposition(&artifact.file_name),
                ),
            ],
            artifact.bytes,
        )
            .into_response(),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

/// `attachment; filename="..."` with every character outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn attachment_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

pub fn error_json(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": msg.into(),
        "status": "error",
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| error_json(format!("Serialization error: {}", e)))
}

pub fn validation_error(err: &ValidationError) -> HttpError {
    let mut body = error_json(err.to_string());
    let key = match err {
        ValidationError::MissingFields(_) => "missing",
        _ => "fields",
    };
    body[key] = serde_json::json!(err.fields());
    (StatusCode::BAD_REQUEST, body)
}

pub fn ingest_error(err: &IngestError) -> HttpError {
    let status = match err {
        IngestError::UnsupportedFormat(_) | IngestError::Empty(_) => StatusCode::BAD_REQUEST,
        IngestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        IngestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error_json(err.to_string()))
}

pub fn prediction_error(err: &PredictionError) -> HttpError {
    let status = match err {
        PredictionError::MissingPayload => StatusCode::BAD_REQUEST,
        PredictionError::InvalidEndpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PredictionError::Unreachable { .. }
        | PredictionError::Rejected { .. }
        | PredictionError::MalformedResponse(_)
        | PredictionError::EmptyResult => StatusCode::BAD_GATEWAY,
    };

    let mut body = error_json(err.to_string());
    body["kind"] = serde_json::json!(err.kind());
    body["recoverable"] = serde_json::json!(err.is_recoverable());
    if let PredictionError::Rejected { status, .. } = err {
        body["upstream_status"] = serde_json::json!(status);
    }
    (status, body)
}

pub fn persistence_error(err: &PersistenceError) -> HttpError {
    let status = match err {
        PersistenceError::Duplicate(_) => StatusCode::CONFLICT,
        PersistenceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("Persistence failure: {}", err);
    (status, error_json(err.to_string()))
}

pub fn physio_error(err: &PhysioError) -> HttpError {
    match err {
        PhysioError::Validation(e) => validation_error(e),
        PhysioError::Persistence(e) => persistence_error(e),
    }
}

pub fn report_failure(err: &ReportFailure) -> HttpError {
    let status = match err {
        ReportFailure::PatientNotFound(_) | ReportFailure::SessionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ReportFailure::Persistence(e) => return persistence_error(e),
        ReportFailure::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error_json(err.to_string()))
}

// ============================================================================
// Unit tests calling inner functions directly
// ============================================================================
