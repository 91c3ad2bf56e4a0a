//! Patient report rendering
//!
//! `ReportRenderer::layout` turns a patient, their history and the compiled
//! insights into a `ReportDocument` (a renderable tree with a fixed section
//! order). `pdf::write_pdf` serialises that tree into an A4 document.
//!
//! Section order: Header, InfoGrid (personal / treatment / progress), Insights,
//! RecentTreatment, SessionHistory. History rows keep the order they were
//! given in (most recent first).

mod pdf;

pub use pdf::write_pdf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::insights::InsightSummary;
use crate::models::{format_pain_level, PatientRecord, PersistedSession};

const NOT_AVAILABLE: &str = "N/A";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("Renderer produced an empty document")]
    Empty,
}

// ============================================================================
// Renderable tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub title: String,
    pub sections: Vec<ReportSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "section", rename_all = "snake_case")]
pub enum ReportSection {
    Header {
        clinic: String,
        title: String,
        patient_name: String,
        patient_code: String,
        status: String,
        generated_at: String,
    },
    InfoGrid {
        columns: Vec<InfoColumn>,
    },
    Insights {
        blocks: Vec<InsightBlock>,
    },
    RecentTreatment {
        text: String,
    },
    SessionHistory {
        rows: Vec<HistoryRow>,
    },
}

impl ReportSection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Header { .. } => "header",
            Self::InfoGrid { .. } => "info_grid",
            Self::Insights { .. } => "insights",
            Self::RecentTreatment { .. } => "recent_treatment",
            Self::SessionHistory { .. } => "session_history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoColumn {
    pub heading: String,
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightBlock {
    pub title: String,
    pub headline: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub date: String,
    pub session_type: String,
    pub notes: String,
    pub pain_level: String,
}

/// Rendered output for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ReportArtifact {
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}

// ============================================================================
// Render surface
// ============================================================================

/// A drawing surface that is hidden except while a render is in progress.
pub trait RenderSurface {
    fn expose(&mut self);
    fn conceal(&mut self);
    fn is_exposed(&self) -> bool;
}

/// Off-screen surface used for server-side rendering.
#[derive(Debug, Default)]
pub struct OffscreenSurface {
    exposed: bool,
    exposures: usize,
}

impl OffscreenSurface {
    pub fn exposures(&self) -> usize {
        self.exposures
    }
}

impl RenderSurface for OffscreenSurface {
    fn expose(&mut self) {
        self.exposed = true;
        self.exposures += 1;
    }

    fn conceal(&mut self) {
        self.exposed = false;
    }

    fn is_exposed(&self) -> bool {
        self.exposed
    }
}

/// Keeps a surface exposed for its lifetime and conceals it on drop,
/// on both the success and the error path.
struct Exposure<'a, S: RenderSurface> {
    surface: &'a mut S,
}

impl<'a, S: RenderSurface> Exposure<'a, S> {
    fn new(surface: &'a mut S) -> Self {
        surface.expose();
        Self { surface }
    }
}

impl<S: RenderSurface> Drop for Exposure<'_, S> {
    fn drop(&mut self) {
        self.surface.conceal();
    }
}

// ============================================================================
// ReportRenderer
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReportRenderer {
    clinic_name: String,
    pain_scale_max: f64,
}

impl ReportRenderer {
    pub fn new(clinic_name: impl Into<String>, pain_scale_max: f64) -> Self {
        Self {
            clinic_name: clinic_name.into(),
            pain_scale_max,
        }
    }

    /// Lay out the report and serialise it to PDF bytes.
    pub fn render(
        &self,
        patient: &PatientRecord,
        history: &[PersistedSession],
        insights: &InsightSummary,
    ) -> Result<ReportArtifact, RenderError> {
        let document = self.layout(patient, history, insights, Utc::now());
        let mut surface = OffscreenSurface::default();
        let artifact = self.export(&document, &mut surface, write_pdf)?;

        tracing::info!(
            patient = %patient.id,
            sessions = history.len(),
            bytes = artifact.bytes.len(),
            "Rendered patient report"
        );
        Ok(artifact)
    }

    /// Run `rasterize` with the surface exposed. The surface is concealed
    /// again before this returns, whatever the outcome.
    pub fn export<S, F>(
        &self,
        document: &ReportDocument,
        surface: &mut S,
        rasterize: F,
    ) -> Result<ReportArtifact, RenderError>
    where
        S: RenderSurface,
        F: FnOnce(&ReportDocument) -> Result<Vec<u8>, RenderError>,
    {
        let bytes = {
            let _exposure = Exposure::new(surface);
            rasterize(document)?
        };

        if bytes.is_empty() {
            return Err(RenderError::Empty);
        }

        Ok(ReportArtifact {
            file_name: format!("{}.pdf", document.title.replace(' ', "_")),
            content_type: "application/pdf",
            bytes,
        })
    }

    pub fn layout(
        &self,
        patient: &PatientRecord,
        history: &[PersistedSession],
        insights: &InsightSummary,
        generated_at: DateTime<Utc>,
    ) -> ReportDocument {
        let mut sections = vec![
            ReportSection::Header {
                clinic: self.clinic_name.clone(),
                title: "Patient Progress Report".to_string(),
                patient_name: patient.full_name(),
                patient_code: patient.patient_code.clone(),
                status: patient.status.clone(),
                generated_at: generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            },
            ReportSection::InfoGrid {
                columns: vec![
                    personal_column(patient),
                    treatment_column(patient),
                    self.progress_column(insights),
                ],
            },
            ReportSection::Insights {
                blocks: insight_blocks(history, insights),
            },
        ];

        if let Some(recent) = history.first() {
            sections.push(ReportSection::RecentTreatment {
                text: non_empty(&recent.treatment_provided, "No treatment data available"),
            });
        }

        sections.push(ReportSection::SessionHistory {
            rows: history.iter().map(|s| self.history_row(s)).collect(),
        });

        ReportDocument {
            title: format!("Patient Report {} {}", patient.first_name, patient.last_name)
                .trim()
                .to_string(),
            sections,
        }
    }

    fn progress_column(&self, insights: &InsightSummary) -> InfoColumn {
        InfoColumn {
            heading: "Progress Overview".to_string(),
            entries: vec![
                (
                    "Initial Pain Level".to_string(),
                    self.pain_out_of_scale(insights.initial_pain_level),
                ),
                (
                    "Current Pain Level".to_string(),
                    self.pain_out_of_scale(insights.current_pain_level),
                ),
                ("Total Sessions".to_string(), insights.total_sessions.to_string()),
                (
                    "Recovery Progress".to_string(),
                    insights
                        .recovery_progress
                        .map(|p| format!("{}%", format_pain_level(p)))
                        .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                ),
            ],
        }
    }

    fn history_row(&self, session: &PersistedSession) -> HistoryRow {
        HistoryRow {
            date: session.session_date.format("%Y-%m-%d").to_string(),
            session_type: session.session_type.label().to_string(),
            notes: session.treatment_provided.clone(),
            pain_level: self.pain_out_of_scale(Some(session.pain_level)),
        }
    }

    fn pain_out_of_scale(&self, level: Option<f64>) -> String {
        match level {
            Some(v) => format!("{}/{}", format_pain_level(v), format_pain_level(self.pain_scale_max)),
            None => NOT_AVAILABLE.to_string(),
        }
    }
}

fn personal_column(patient: &PatientRecord) -> InfoColumn {
    InfoColumn {
        heading: "Personal Information".to_string(),
        entries: vec![
            (
                "Age".to_string(),
                patient
                    .age
                    .map(|a| format!("{} years", a))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            ),
            ("Gender".to_string(), or_na(patient.gender.as_deref())),
            ("Contact".to_string(), or_na(patient.contact.as_deref())),
            ("Email".to_string(), or_na(patient.email.as_deref())),
        ],
    }
}

fn treatment_column(patient: &PatientRecord) -> InfoColumn {
    InfoColumn {
        heading: "Treatment Information".to_string(),
        entries: vec![
            ("Condition".to_string(), or_na(patient.condition.as_deref())),
            ("Start Date".to_string(), or_na_date(patient.start_date)),
            ("Last Visit".to_string(), or_na_date(patient.last_visit)),
            (
                "Next Appointment".to_string(),
                or_na(patient.next_appointment.as_deref()),
            ),
        ],
    }
}

fn insight_blocks(history: &[PersistedSession], insights: &InsightSummary) -> Vec<InsightBlock> {
    let mut blocks = Vec::new();

    if insights.shows_pain_reduction() {
        if let (Some(reduction), Some(initial), Some(current)) = (
            insights.pain_reduction,
            insights.initial_pain_level,
            insights.current_pain_level,
        ) {
            let rate = insights
                .improvement_rate
                .map(|r| format!(" ({}%)", format_pain_level(r)))
                .unwrap_or_default();
            blocks.push(InsightBlock {
                title: "Pain Reduction".to_string(),
                headline: format!("{} points{}", format_pain_level(reduction), rate),
                detail: format!(
                    "Pain reduced from {} to {} since treatment began",
                    format_pain_level(initial),
                    format_pain_level(current)
                ),
            });
        }
    }

    if insights.shows_mobility_trend() {
        blocks.push(InsightBlock {
            title: "Mobility Assessment".to_string(),
            headline: insights.mobility_trend.label().to_string(),
            detail: history
                .first()
                .map(|s| s.mobility_assessment.clone())
                .unwrap_or_default(),
        });
    }

    blocks.push(InsightBlock {
        title: "Treatment Summary".to_string(),
        headline: format!("{} sessions completed", insights.total_sessions),
        detail: format!(
            "Last visit: {}. Next appointment: {}",
            or_na_date(insights.last_session_date),
            or_na(insights.next_appointment.as_deref())
        ),
    });

    blocks
}

fn or_na(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn or_na_date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn non_empty(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
