pub mod patient;
pub mod payload;
pub mod session;

pub use patient::PatientRecord;
pub use payload::{SensorFormat, SensorPayload};
pub use session::{format_pain_level, PersistedSession, SessionType};
