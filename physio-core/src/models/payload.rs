use serde::{Deserialize, Serialize};
use std::fmt;

/// Spreadsheet formats the prediction service knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SensorFormat {
    /// Recognise a format from the file extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Xls => "application/vnd.ms-excel",
        }
    }
}

impl fmt::Display for SensorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Uploaded sensor recording. Opaque bytes until the prediction service reads them.
#[derive(Clone, PartialEq, Eq)]
pub struct SensorPayload {
    pub file_name: String,
    pub format: SensorFormat,
    pub bytes: Vec<u8>,
}

impl SensorPayload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SensorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorPayload")
            .field("file_name", &self.file_name)
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}
