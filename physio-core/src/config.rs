use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PhysioConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Unix socket for the MessagePack IPC transport. `None` disables it.
    pub socket_path: Option<String>,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionConfig {
    /// Full URL of the external inference endpoint, e.g. `http://localhost:5001/predict`.
    pub endpoint: String,
    #[serde(default = "default_prediction_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_prediction_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// JSON field holding the sequence of predicted class labels.
    #[serde(default = "default_response_field")]
    pub response_field: String,
}

fn default_prediction_timeout() -> u64 {
    30
}

fn default_prediction_retries() -> usize {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_response_field() -> String {
    "predicted_classes".to_string()
}

impl PredictionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_seconds: default_prediction_timeout(),
            max_retries: default_prediction_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            response_field: default_response_field(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub upload_dir: String,
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads/physiological".to_string(),
            max_file_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Upper bound of the canonical pain scale (lower bound is always 0).
    pub pain_scale_max: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pain_scale_max: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub clinic_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            clinic_name: "Physiotherapy Clinic".to_string(),
        }
    }
}

impl PhysioConfig {
    /// Load from a TOML file, with `PHYSIO__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("PHYSIO").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
