//! Insight and report requests
//!
//! Loads a patient's history from the store, compiles insights, and renders
//! the PDF on the blocking pool. A failure here never touches stored data.

use physio_core::{
    InsightSummary, PatientRecord, PersistedSession, PersistenceError, RenderError, ReportArtifact,
};
use thiserror::Error;
use uuid::Uuid;

use crate::context::ServiceContext;

#[derive(Error, Debug)]
pub enum ReportFailure {
    #[error("Patient {0} not found")]
    PatientNotFound(String),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// History (most recent first) and the insights compiled from it.
pub struct PatientHistory {
    pub patient: Option<PatientRecord>,
    pub sessions: Vec<PersistedSession>,
    pub insights: InsightSummary,
}

pub async fn load_history(ctx: &ServiceContext, patient_id: &str) -> Result<PatientHistory, ReportFailure> {
    let patient = ctx.store.get_patient(patient_id).await?;
    let sessions = ctx.store.list_sessions_for_patient(patient_id).await?;

    if patient.is_none() && sessions.is_empty() {
        return Err(ReportFailure::PatientNotFound(patient_id.to_string()));
    }

    let next_appointment = patient.as_ref().and_then(|p| p.next_appointment.as_deref());
    let insights = ctx.insights.compile(&sessions, next_appointment);

    Ok(PatientHistory {
        patient,
        sessions,
        insights,
    })
}

pub async fn compile_insights(ctx: &ServiceContext, patient_id: &str) -> Result<InsightSummary, ReportFailure> {
    Ok(load_history(ctx, patient_id).await?.insights)
}

/// Full progress report for one patient.
pub async fn patient_report(ctx: &ServiceContext, patient_id: &str) -> Result<ReportArtifact, ReportFailure> {
    let history = load_history(ctx, patient_id).await?;
    let patient = history
        .patient
        .ok_or_else(|| ReportFailure::PatientNotFound(patient_id.to_string()))?;

    render(ctx, patient, history.sessions, history.insights).await
}

/// Report generated from a single session: the owning patient's report,
/// downloaded under the session's name.
pub async fn session_report(ctx: &ServiceContext, session_id: Uuid) -> Result<ReportArtifact, ReportFailure> {
    let session = ctx
        .store
        .get_session(session_id)
        .await?
        .ok_or(ReportFailure::SessionNotFound(session_id))?;

    let artifact = patient_report(ctx, &session.patient_id).await?;
    Ok(artifact.with_file_name(format!("session_report_{}.pdf", session_id)))
}

async fn render(
    ctx: &ServiceContext,
    patient: PatientRecord,
    sessions: Vec<PersistedSession>,
    insights: InsightSummary,
) -> Result<ReportArtifact, ReportFailure> {
    let renderer = ctx.renderer.clone();
    let artifact = tokio::task::spawn_blocking(move || renderer.render(&patient, &sessions, &insights))
        .await
        .map_err(|e| RenderError::Pdf(format!("render task failed: {}", e)))??;
    Ok(artifact)
}
