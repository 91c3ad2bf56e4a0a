use crate::context::ServiceContext;
use crate::subsystems::reports::{self, ReportFailure};
use physio_core::ipc::{PhysioRequest, PhysioResponse};

pub async fn handle_request(request: PhysioRequest, ctx: &ServiceContext) -> PhysioResponse {
    match request {
        PhysioRequest::Ping => PhysioResponse::pong(),
        PhysioRequest::Health => match ctx.store.health().await {
            Ok(version) => PhysioResponse::ok(serde_json::json!({
                "status": "healthy",
                "storage": ctx.store.name(),
                "database": version,
                "predictor": ctx.predictor.name(),
            })),
            Err(e) => PhysioResponse::err(format!("Storage health check failed: {}", e)),
        },
        PhysioRequest::Insights { patient_id } => {
            match reports::compile_insights(ctx, &patient_id).await {
                Ok(summary) => to_response(&summary),
                Err(e) => failure_response(e),
            }
        }
        PhysioRequest::ListSessions { patient_id } => {
            match ctx.store.list_sessions_for_patient(&patient_id).await {
                Ok(sessions) => PhysioResponse::ok(serde_json::json!({
                    "count": sessions.len(),
                    "sessions": sessions,
                })),
                Err(e) => PhysioResponse::err(e.to_string()),
            }
        }
        PhysioRequest::GetSession { id } => match ctx.store.get_session(id).await {
            Ok(Some(session)) => to_response(&session),
            Ok(None) => PhysioResponse::err(ReportFailure::SessionNotFound(id).to_string()),
            Err(e) => PhysioResponse::err(e.to_string()),
        },
    }
}

fn to_response<T: serde::Serialize>(value: &T) -> PhysioResponse {
    match serde_json::to_value(value) {
        Ok(data) => PhysioResponse::ok(data),
        Err(e) => PhysioResponse::err(format!("Serialization error: {}", e)),
    }
}

fn failure_response(failure: ReportFailure) -> PhysioResponse {
    tracing::warn!("IPC request failed: {}", failure);
    PhysioResponse::err(failure.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use physio_core::config::{DatabaseConfig, PredictionConfig};
    use physio_core::{
        MemorySessionStore, PhysioConfig, PredictionBackend, PredictionError, PredictionResult,
        SensorPayload,
    };

    struct NoPredictor;

    #[async_trait]
    impl PredictionBackend for NoPredictor {
        async fn predict(&self, _: &SensorPayload) -> Result<PredictionResult, PredictionError> {
            Err(PredictionError::MissingPayload)
        }
        fn name(&self) -> &str {
            "none"
        }
    }

    fn ctx() -> ServiceContext {
        let config = PhysioConfig {
            service: Default::default(),
            database: DatabaseConfig {
                url: "unused".to_string(),
                max_connections: 1,
            },
            storage: Default::default(),
            http: Default::default(),
            prediction: PredictionConfig::new("http://127.0.0.1:9/predict"),
            ingest: Default::default(),
            session: Default::default(),
            report: Default::default(),
        };
        ServiceContext::new(config, Arc::new(MemorySessionStore::new()), Arc::new(NoPredictor))
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = handle_request(PhysioRequest::Ping, &ctx()).await;
        assert!(resp.is_ok());
        assert_eq!(resp.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_health_reports_storage() {
        let resp = handle_request(PhysioRequest::Health, &ctx()).await;
        let data = resp.data.unwrap();
        assert_eq!(data["storage"], "memory");
        assert_eq!(data["predictor"], "none");
    }

    #[tokio::test]
    async fn test_unknown_patient_and_session() {
        let ctx = ctx();
        let resp = handle_request(
            PhysioRequest::Insights {
                patient_id: "nobody".to_string(),
            },
            &ctx,
        )
        .await;
        assert!(!resp.is_ok());
        assert!(resp.error.unwrap().contains("nobody"));

        let resp = handle_request(PhysioRequest::GetSession { id: uuid::Uuid::nil() }, &ctx).await;
        assert!(!resp.is_ok());
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let resp = handle_request(
            PhysioRequest::ListSessions {
                patient_id: "p-1".to_string(),
            },
            &ctx(),
        )
        .await;
        assert_eq!(resp.data.unwrap()["count"], 0);
    }
}
