//! Session draft aggregate
//!
//! The draft is the single mutable record threaded through the intake pipeline:
//! user-entered fields, the uploaded sensor payload, and the predicted pain score.
//! It is owned by one editing flow at a time and is only turned into a
//! [`ValidatedSession`] once every required field is present.
//!
//! Attachment replacement bumps a generation counter. A prediction started
//! against an older attachment carries the older generation in its
//! [`PredictionTicket`] and is discarded on merge (last write wins).

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::ValidationError;
use crate::models::{SensorPayload, SessionType};
use crate::prediction::{PredictionError, PredictionResult};

pub const FIELD_SESSION_TYPE: &str = "session_type";
pub const FIELD_DATE: &str = "date";
pub const FIELD_TIME: &str = "time";
pub const FIELD_PAIN_LEVEL: &str = "pain_level";
pub const FIELD_TREATMENT: &str = "treatment_provided";
pub const FIELD_ATTACHMENT: &str = "attachment";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDraft {
    pub patient_id: String,
    pub session_type: Option<SessionType>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    /// Manually entered or copied from the last successful prediction.
    pub pain_level: Option<f64>,
    pub mobility_assessment: String,
    pub treatment_provided: String,
    pub prescribed_exercises: String,
    attachment: Option<SensorPayload>,
    predicted_pain_level: Option<f64>,
    prediction_attempted: bool,
    generation: u64,
}

/// Identifies the attachment a prediction request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeOutcome {
    /// The final label was copied into `pain_level` and `predicted_pain_level`.
    Applied(f64),
    /// The attachment changed while the request was outstanding; draft untouched.
    Stale,
}

/// A draft that passed [`SessionDraft::validate_for_finalization`].
///
/// Only this module can construct one, so persistence cannot be reached
/// with an unvalidated draft.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSession {
    pub patient_id: String,
    pub session_type: SessionType,
    pub session_date: DateTime<Utc>,
    pub pain_level: f64,
    pub predicted_pain_level: Option<f64>,
    pub mobility_assessment: String,
    pub treatment_provided: String,
    pub prescribed_exercises: String,
    pub attachment: Option<SensorPayload>,
    _sealed: (),
}

impl SessionDraft {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            session_type: None,
            date: None,
            time: None,
            pain_level: None,
            mobility_assessment: String::new(),
            treatment_provided: String::new(),
            prescribed_exercises: String::new(),
            attachment: None,
            predicted_pain_level: None,
            prediction_attempted: false,
            generation: 0,
        }
    }

    /// Associate a sensor file with the draft, replacing any previous one.
    ///
    /// The predicted score is cleared because it was computed over the old file.
    /// A manually entered `pain_level` is left alone. Returns the replaced payload.
    pub fn attach(&mut self, payload: SensorPayload) -> Option<SensorPayload> {
        self.generation += 1;
        self.predicted_pain_level = None;
        self.attachment.replace(payload)
    }

    pub fn attachment(&self) -> Option<&SensorPayload> {
        self.attachment.as_ref()
    }

    pub fn predicted_pain_level(&self) -> Option<f64> {
        self.predicted_pain_level
    }

    pub fn prediction_attempted(&self) -> bool {
        self.prediction_attempted
    }

    /// Mark a prediction as in flight for the current attachment.
    pub fn begin_prediction(&mut self) -> Result<PredictionTicket, PredictionError> {
        if self.attachment.is_none() {
            return Err(PredictionError::MissingPayload);
        }
        self.prediction_attempted = true;
        Ok(PredictionTicket {
            generation: self.generation,
        })
    }

    /// Copy the final label of a prediction into the draft.
    pub fn merge(&mut self, ticket: PredictionTicket, result: &PredictionResult) -> MergeOutcome {
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "Discarding prediction for a replaced attachment"
            );
            return MergeOutcome::Stale;
        }
        let label = result.final_label();
        self.pain_level = Some(label);
        self.predicted_pain_level = Some(label);
        MergeOutcome::Applied(label)
    }

    /// True when a manual edit moved `pain_level` away from the last prediction.
    pub fn diverges_from_prediction(&self) -> bool {
        match (self.pain_level, self.predicted_pain_level) {
            (Some(manual), Some(predicted)) => manual != predicted,
            _ => false,
        }
    }

    /// Every required field that is currently empty, in a stable order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.session_type.is_none() {
            missing.push(FIELD_SESSION_TYPE);
        }
        if self.date.is_none() {
            missing.push(FIELD_DATE);
        }
        if self.time.is_none() {
            missing.push(FIELD_TIME);
        }
        if self.pain_level.is_none() {
            missing.push(FIELD_PAIN_LEVEL);
        }
        if self.treatment_provided.trim().is_empty() {
            missing.push(FIELD_TREATMENT);
        }
        if self.prediction_attempted && self.attachment.is_none() {
            missing.push(FIELD_ATTACHMENT);
        }
        missing
    }

    /// Check the finalization contract and combine date and time into one UTC timestamp.
    ///
    /// Reports all missing fields at once. Range checks only run once nothing is missing.
    pub fn validate_for_finalization(
        &self,
        pain_scale_max: f64,
    ) -> Result<ValidatedSession, ValidationError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let (Some(session_type), Some(date), Some(time), Some(pain_level)) =
            (self.session_type, self.date, self.time, self.pain_level)
        else {
            return Err(ValidationError::MissingFields(self.missing_fields()));
        };

        if !pain_level.is_finite() {
            return Err(ValidationError::invalid(FIELD_PAIN_LEVEL, "not a number"));
        }
        if !(0.0..=pain_scale_max).contains(&pain_level) {
            return Err(ValidationError::OutOfRange {
                field: FIELD_PAIN_LEVEL,
                value: pain_level,
                max: pain_scale_max,
            });
        }

        Ok(ValidatedSession {
            patient_id: self.patient_id.clone(),
            session_type,
            session_date: Utc.from_utc_datetime(&date.and_time(time)),
            pain_level,
            predicted_pain_level: self.predicted_pain_level,
            mobility_assessment: self.mobility_assessment.trim().to_string(),
            treatment_provided: self.treatment_provided.trim().to_string(),
            prescribed_exercises: self.prescribed_exercises.trim().to_string(),
            attachment: self.attachment.clone(),
            _sealed: (),
        })
    }
}
