//! Sensor data intake
//!
//! `SensorDataIngestor` checks an uploaded file against the recognised
//! spreadsheet formats and attaches it to a draft as an opaque payload.
//! `AttachmentStore` writes finalized payloads to the upload directory and
//! removes them again when the session write that referenced them fails.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use physio_core::config::IngestConfig;
use physio_core::{SensorFormat, SensorPayload, SessionDraft};
use regex::Regex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file format: {0} (expected .csv, .xlsx or .xls)")]
    UnsupportedFormat(String),

    #[error("Uploaded file {0} is empty")]
    Empty(String),

    #[error("Uploaded file is {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("Attachment IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// SensorDataIngestor
// ============================================================================

#[derive(Debug, Clone)]
pub struct SensorDataIngestor {
    max_file_bytes: u64,
}

impl SensorDataIngestor {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.max_file_bytes)
    }

    /// Check an upload and wrap it as a payload. Content is never parsed.
    pub fn payload(&self, file_name: &str, bytes: Vec<u8>) -> Result<SensorPayload, IngestError> {
        let format = SensorFormat::from_file_name(file_name)
            .ok_or_else(|| IngestError::UnsupportedFormat(file_name.to_string()))?;

        if bytes.is_empty() {
            return Err(IngestError::Empty(file_name.to_string()));
        }

        let size = bytes.len() as u64;
        if size > self.max_file_bytes {
            return Err(IngestError::TooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }

        Ok(SensorPayload {
            file_name: file_name.to_string(),
            format,
            bytes,
        })
    }

    /// Attach an upload to the draft, replacing (and returning) any previous one.
    /// A rejected upload leaves the draft untouched.
    pub fn accept(
        &self,
        draft: &mut SessionDraft,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<SensorPayload>, IngestError> {
        let payload = self.payload(file_name, bytes)?;
        tracing::debug!(
            patient = %draft.patient_id,
            file = %payload.file_name,
            format = %payload.format,
            bytes = payload.len(),
            "Attaching sensor data to draft"
        );
        Ok(draft.attach(payload))
    }
}

impl Default for SensorDataIngestor {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

// ============================================================================
// AttachmentStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.upload_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the payload unmodified under the upload directory.
    ///
    /// Every stored name carries a random component, so concurrent uploads of
    /// the same file never share a target. Bytes go to a hidden temporary file,
    /// are synced to disk, then renamed into place, so a partially written
    /// attachment is never visible under its final name.
    pub async fn store(&self, payload: &SensorPayload) -> Result<PathBuf, IngestError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let millis = chrono::Utc::now().timestamp_millis();
        let name = sanitize_file_name(&payload.file_name, payload.format);
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let target = self
            .root
            .join(format!("{}-{}-{}", millis, &unique[..8], name));
        let temp = self.root.join(format!(".{}.part", unique));

        if let Err(e) = write_synced(&temp, &payload.bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::info!(path = %target.display(), bytes = payload.len(), "Stored attachment");
        Ok(target)
    }

    /// Delete a stored attachment. A file that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), IngestError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Removed attachment");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"))
}

/// Reduce an uploaded name to a safe single path component.
///
/// Directory parts are dropped, runs of unsafe characters become `_`, and
/// leading dots are stripped. An empty result falls back to `upload.<ext>`.
pub fn sanitize_file_name(original: &str, format: SensorFormat) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    let cleaned = unsafe_chars().replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        format!("upload.{}", format.extension())
    } else {
        cleaned.to_string()
    }
}
