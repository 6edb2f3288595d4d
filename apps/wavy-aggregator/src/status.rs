//! 状态端点
//!
//! - GET /health
//! - GET /metrics

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use wavy_pipeline::Pipeline;
use wavy_policy::PolicyResolver;
use wavy_telemetry::{MetricsSnapshot, metrics};

#[derive(Clone)]
pub struct StatusState {
    pub pipeline: Pipeline,
    pub policies: Arc<PolicyResolver>,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    counters: MetricsSnapshot,
    pending_readings: usize,
    policy_overrides: usize,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    addr: &str,
    state: StatusState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("status endpoint listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn get_metrics(State(state): State<StatusState>) -> impl IntoResponse {
    Json(MetricsResponse {
        counters: metrics().snapshot(),
        pending_readings: state.pipeline.engine().pending_total().await,
        policy_overrides: state.policies.snapshot().overrides.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wavy_pipeline::{BatchEngine, BatchSink, DeliveryPool, DeliveryReport};
    use wavy_policy::{FilePolicySource, PolicyTable};

    struct NullSink;

    #[async_trait::async_trait]
    impl BatchSink for NullSink {
        async fn deliver(&self, batch: &domain::FlushedBatch) -> DeliveryReport {
            DeliveryReport::from_outcomes(batch.destination.clone(), Vec::new())
        }
    }

    fn state() -> StatusState {
        let (queue, _pool) = DeliveryPool::spawn(Arc::new(NullSink), 1, 4);
        let (table, _) = PolicyTable::parse("DEFAULT:none:3:localhost\nWAVY_001:uppercase:2:storage\n");
        StatusState {
            pipeline: Pipeline::new(Arc::new(BatchEngine::default()), queue),
            policies: Arc::new(PolicyResolver::with_table(
                Arc::new(FilePolicySource::new("unused.csv")),
                table,
            )),
        }
    }

    async fn get_json(path: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn metrics_exposes_counters_and_table() {
        let (status, body) = get_json("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["counters"]["received"].is_u64());
        assert_eq!(body["pending_readings"], 0);
        assert_eq!(body["policy_overrides"], 1);
    }
}
