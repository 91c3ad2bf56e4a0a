//! Session storage seam
//!
//! `SessionStore` is implemented by the Postgres store in the server crate and
//! by `MemorySessionStore` here (tests and `[storage] backend = "memory"`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::draft::ValidatedSession;
use crate::error::PersistenceError;
use crate::models::{PatientRecord, PersistedSession, SessionType};

/// Row about to be written. Built from a `ValidatedSession` once the
/// attachment (if any) has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
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
}

impl NewSession {
    pub fn from_validated(
        session: &ValidatedSession,
        user_id: impl Into<String>,
        session_code: impl Into<String>,
        attachment_path: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_code: session_code.into(),
            user_id: user_id.into(),
            patient_id: session.patient_id.clone(),
            session_type: session.session_type,
            session_date: session.session_date,
            pain_level: session.pain_level,
            predicted_pain_level: session.predicted_pain_level,
            mobility_assessment: session.mobility_assessment.clone(),
            treatment_provided: session.treatment_provided.clone(),
            prescribed_exercises: session.prescribed_exercises.clone(),
            attachment_path,
        }
    }

    pub fn into_persisted(self, created_at: DateTime<Utc>) -> PersistedSession {
        PersistedSession {
            id: self.id,
            session_code: self.session_code,
            user_id: self.user_id,
            patient_id: self.patient_id,
            session_type: self.session_type,
            session_date: self.session_date,
            pain_level: self.pain_level,
            predicted_pain_level: self.predicted_pain_level,
            mobility_assessment: self.mobility_assessment,
            treatment_provided: self.treatment_provided,
            prescribed_exercises: self.prescribed_exercises,
            attachment_path: self.attachment_path,
            created_at,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write one session atomically. Nothing is visible if this fails.
    async fn insert_session(&self, session: NewSession) -> Result<PersistedSession, PersistenceError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<PersistedSession>, PersistenceError>;

    /// All sessions for a patient, most recent `session_date` first.
    async fn list_sessions_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<PersistedSession>, PersistenceError>;

    async fn get_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>, PersistenceError>;

    async fn health(&self) -> Result<String, PersistenceError>;

    fn name(&self) -> &str;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<Uuid, PersistedSession>,
    patients: HashMap<String, PatientRecord>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    state: RwLock<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a patient record (patients are owned elsewhere; this store only reads them).
    pub async fn insert_patient(&self, patient: PatientRecord) {
        self.state
            .write()
            .await
            .patients
            .insert(patient.id.clone(), patient);
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: NewSession) -> Result<PersistedSession, PersistenceError> {
        let mut state = self.state.write().await;

        if state
            .sessions
            .values()
            .any(|s| s.session_code == session.session_code)
        {
            return Err(PersistenceError::Duplicate(session.session_code));
        }

        let persisted = session.into_persisted(Utc::now());
        if let Some(patient) = state.patients.get_mut(&persisted.patient_id) {
            patient.no_of_sessions += 1;
            patient.last_visit = patient.last_visit.max(Some(persisted.session_date));
        }
        state.sessions.insert(persisted.id, persisted.clone());

        Ok(persisted)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<PersistedSession>, PersistenceError> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<PersistedSession>, PersistenceError> {
        let state = self.state.read().await;
        let mut sessions: Vec<PersistedSession> = state
            .sessions
            .values()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.session_date
                .cmp(&a.session_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(sessions)
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>, PersistenceError> {
        Ok(self.state.read().await.patients.get(patient_id).cloned())
    }

    async fn health(&self) -> Result<String, PersistenceError> {
        let state = self.state.read().await;
        Ok(format!(
            "memory ({} sessions, {} patients)",
            state.sessions.len(),
            state.patients.len()
        ))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
