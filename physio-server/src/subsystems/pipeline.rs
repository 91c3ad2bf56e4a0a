//! Session intake pipeline
//!
//! Turns a submitted session form into a `SessionDraft` and runs the
//! prediction step against it. The draft is passed explicitly through each
//! stage; nothing here holds state between requests.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use physio_core::{
    MergeOutcome, PredictionBackend, PredictionError, PredictionResult, SessionDraft, SessionType,
    ValidationError,
};
use physio_ingest::{IngestError, SensorDataIngestor};
use thiserror::Error;

// Multipart field names accepted by the session endpoint.
pub const FORM_USER: &str = "user";
pub const FORM_PATIENT: &str = "patient";
pub const FORM_SESSION_ID: &str = "sessionID";
pub const FORM_SESSION_TYPE: &str = "sessionType";
pub const FORM_SESSION_DATE: &str = "sessionDate";
pub const FORM_PAIN_LEVEL: &str = "painLevel";
pub const FORM_MOBILITY: &str = "mobilityAssessment";
pub const FORM_TREATMENT: &str = "treatmentProvided";
pub const FORM_EXERCISE: &str = "prescribedExercise";
pub const FORM_ATTACHMENT: &str = "excelFile";
pub const FORM_AUTO_PREDICT: &str = "autoPredict";

/// Required text fields, in the order they are reported when missing.
pub const REQUIRED_FIELDS: [&str; 9] = [
    FORM_USER,
    FORM_PATIENT,
    FORM_SESSION_ID,
    FORM_SESSION_TYPE,
    FORM_SESSION_DATE,
    FORM_PAIN_LEVEL,
    FORM_MOBILITY,
    FORM_TREATMENT,
    FORM_EXERCISE,
];

#[derive(Error, Debug)]
pub enum FormError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Raw multipart submission: text fields by name plus file parts by name.
#[derive(Debug, Default, Clone)]
pub struct SessionForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, UploadedFile>,
}

/// A form that passed the required-field check, ready for finalize.
#[derive(Debug)]
pub struct SessionSubmission {
    pub user_id: String,
    pub session_code: String,
    pub draft: SessionDraft,
    pub auto_predict: bool,
}

impl SessionForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Every required field that is absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| self.field(name).is_none())
            .collect()
    }

    pub fn auto_predict(&self) -> bool {
        matches!(self.field(FORM_AUTO_PREDICT), Some("true" | "1" | "yes" | "on"))
    }

    /// Build a draft from the form. The optional attachment goes through the ingestor.
    pub fn into_submission(mut self, ingestor: &SensorDataIngestor) -> Result<SessionSubmission, FormError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing).into());
        }

        let auto_predict = self.auto_predict();
        let text = |form: &SessionForm, name: &str| form.field(name).unwrap_or_default().to_string();

        let session_type: SessionType = self
            .field(FORM_SESSION_TYPE)
            .unwrap_or_default()
            .parse()?;
        let session_date = parse_session_date(self.field(FORM_SESSION_DATE).unwrap_or_default())?;
        let pain_level = self
            .field(FORM_PAIN_LEVEL)
            .unwrap_or_default()
            .parse::<f64>()
            .map_err(|_| ValidationError::invalid("pain_level", "not a number"))?;

        let mut draft = SessionDraft::new(text(&self, FORM_PATIENT));
        draft.session_type = Some(session_type);
        draft.date = Some(session_date.date_naive());
        draft.time = Some(session_date.time());
        draft.pain_level = Some(pain_level);
        draft.mobility_assessment = text(&self, FORM_MOBILITY);
        draft.treatment_provided = text(&self, FORM_TREATMENT);
        draft.prescribed_exercises = text(&self, FORM_EXERCISE);

        if let Some(upload) = self.files.remove(FORM_ATTACHMENT) {
            ingestor.accept(&mut draft, &upload.file_name, upload.bytes)?;
        }

        Ok(SessionSubmission {
            user_id: text(&self, FORM_USER),
            session_code: text(&self, FORM_SESSION_ID),
            draft,
            auto_predict,
        })
    }
}

/// ISO 8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_session_date(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(ValidationError::invalid(
        "session_date",
        format!("'{}' is not an ISO 8601 timestamp", raw),
    ))
}

// ============================================================================
// Prediction step
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub result: PredictionResult,
    pub merge: MergeOutcome,
}

/// Send the draft's attachment to the prediction service and merge the final label.
///
/// The ticket is taken before the request goes out, so if the attachment is
/// replaced in the meantime the merge reports `Stale` and the draft keeps its
/// newer state. On error the draft is unchanged apart from being marked as
/// having attempted a prediction.
pub async fn request_prediction(
    draft: &mut SessionDraft,
    backend: &dyn PredictionBackend,
) -> Result<PredictionOutcome, PredictionError> {
    let ticket = draft.begin_prediction()?;
    let payload = draft
        .attachment()
        .cloned()
        .ok_or(PredictionError::MissingPayload)?;

    let result = match backend.predict(&payload).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                patient = %draft.patient_id,
                backend = backend.name(),
                kind = e.kind(),
                "Prediction failed: {}",
                e
            );
            return Err(e);
        }
    };

    let merge = draft.merge(ticket, &result);
    tracing::info!(
        patient = %draft.patient_id,
        windows = result.classes().len(),
        label = result.final_label(),
        merge = ?merge,
        "Prediction merged"
    );

    Ok(PredictionOutcome { result, merge })
}
