use std::sync::Arc;

use anyhow::Context;
use physio_core::config::StorageBackend;
use physio_core::{
    create_backend, InsightCompiler, MemorySessionStore, PhysioConfig, PredictionBackend,
    ReportRenderer, SessionStore,
};
use physio_ingest::{AttachmentStore, SensorDataIngestor};

use crate::subsystems::persist::{PgSessionStore, SessionPersistenceGateway};

/// Everything a request handler needs, shared by the HTTP and IPC transports.
pub struct ServiceContext {
    pub config: PhysioConfig,
    pub store: Arc<dyn SessionStore>,
    pub predictor: Arc<dyn PredictionBackend>,
    pub ingestor: SensorDataIngestor,
    pub gateway: SessionPersistenceGateway,
    pub insights: InsightCompiler,
    pub renderer: ReportRenderer,
}

impl ServiceContext {
    pub fn new(
        config: PhysioConfig,
        store: Arc<dyn SessionStore>,
        predictor: Arc<dyn PredictionBackend>,
    ) -> Self {
        let pain_scale_max = config.session.pain_scale_max;
        let gateway = SessionPersistenceGateway::new(
            store.clone(),
            AttachmentStore::from_config(&config.ingest),
            pain_scale_max,
        );

        Self {
            ingestor: SensorDataIngestor::from_config(&config.ingest),
            insights: InsightCompiler::new(pain_scale_max),
            renderer: ReportRenderer::new(config.report.clinic_name.clone(), pain_scale_max),
            gateway,
            store,
            predictor,
            config,
        }
    }

    /// Build the configured store and prediction client.
    pub async fn from_config(config: PhysioConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn SessionStore> = match config.storage.backend {
            StorageBackend::Postgres => {
                let pool = physio_core::db::create_pool(&config.database)
                    .await
                    .context("Failed to connect to database")?;
                physio_core::db::ensure_schema(&pool)
                    .await
                    .context("Failed to apply schema")?;
                Arc::new(PgSessionStore::new(pool))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory session store; sessions are lost on restart");
                Arc::new(MemorySessionStore::new())
            }
        };

        let predictor: Arc<dyn PredictionBackend> = Arc::from(
            create_backend(&config.prediction).context("Failed to create prediction client")?,
        );

        tracing::info!(
            storage = store.name(),
            predictor = predictor.name(),
            endpoint = %config.prediction.endpoint,
            "Service context ready"
        );

        Ok(Self::new(config, store, predictor))
    }
}
