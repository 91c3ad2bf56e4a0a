use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    #[serde(rename = "initial_assessment", alias = "initial")]
    Initial,
    #[serde(rename = "follow_up", alias = "followUp")]
    FollowUp,
    #[serde(rename = "treatment")]
    Treatment,
    /// Review and discharge visits share one type.
    #[serde(rename = "review", alias = "discharge")]
    Review,
}

impl SessionType {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial_assessment",
            Self::FollowUp => "follow_up",
            Self::Treatment => "treatment",
            Self::Review => "review",
        }
    }

    /// Human-facing label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initial => "Initial Assessment",
            Self::FollowUp => "Follow-up",
            Self::Treatment => "Treatment",
            Self::Review => "Review / Discharge",
        }
    }
}

impl FromStr for SessionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "initial" | "initial_assessment" => Ok(Self::Initial),
            "followUp" | "follow_up" | "follow-up" => Ok(Self::FollowUp),
            "treatment" => Ok(Self::Treatment),
            "review" | "discharge" => Ok(Self::Review),
            other => Err(ValidationError::invalid(
                "session_type",
                format!("unknown session type '{}'", other),
            )),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized session. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub id: Uuid,
    pub session_code: String,
    pub user_id: String,
    pub patient_id: String,
    pub session_type: SessionType,
    pub session_date: DateTime<Utc>,
    pub pain_level: f64,
    pub predicted_pain_level: Option<f64>,
    pub mobility_assessment: String,
    pub treatment_provided: String,
    pub prescribed_exercises: String,
    pub attachment_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Render a pain level without a trailing `.0` (`3.0` -> `"3"`, `6.5` -> `"6.5"`).
pub fn format_pain_level(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        let s = format!("{:.2}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
