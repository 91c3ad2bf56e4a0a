use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of a patient, owned by the demographics collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct PatientRecord {
    pub id: String,
    pub patient_code: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub condition: Option<String>,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub last_visit: Option<DateTime<Utc>>,
    pub next_appointment: Option<String>,
    pub no_of_sessions: i32,
}

impl PatientRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}
