use thiserror::Error;

/// Failure of the finalize sequence: the draft was incomplete or the write failed.
#[derive(Error, Debug)]
pub enum PhysioError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Local, non-fatal problems with a draft or a submitted form.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Every missing field, in declaration order.
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("{field} out of range: {value} (expected 0 to {max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Names of the offending fields, for structured 400 bodies.
    pub fn fields(&self) -> Vec<&'static str> {
        match self {
            Self::MissingFields(fields) => fields.clone(),
            Self::OutOfRange { field, .. } | Self::Invalid { field, .. } => vec![field],
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session {0} already exists")]
    Duplicate(String),

    #[error("Attachment storage failed: {0}")]
    Attachment(String),

    #[error("Stored row is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
