pub mod config;
pub mod db;
pub mod draft;
pub mod error;
pub mod insights;
pub mod ipc;
pub mod models;
pub mod prediction;
pub mod report;
pub mod store;

pub use config::PhysioConfig;
pub use draft::{MergeOutcome, PredictionTicket, SessionDraft, ValidatedSession};
pub use error::{PersistenceError, PhysioError, ValidationError};
pub use insights::{InsightCompiler, InsightSummary, MobilityTrend};
pub use models::{PatientRecord, PersistedSession, SensorFormat, SensorPayload, SessionType};
pub use prediction::{
    create_backend, HttpPredictionClient, PredictionBackend, PredictionError, PredictionResult,
};
pub use report::{ReportArtifact, ReportDocument, ReportRenderer, RenderError};
pub use store::{MemorySessionStore, NewSession, SessionStore};
