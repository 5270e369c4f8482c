//! Built-in public endpoints: `/health`, `/ready` and `/metrics`.
//!
//! Handlers return an [`EndpointResponse`]; the caller writes it to the session.

use std::time::Instant;

use crate::metrics::Metrics;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl EndpointResponse {
    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    /// Prometheus text exposition format
    pub fn prometheus(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body,
        }
    }
}

/// Liveness with uptime and version
pub fn handle_health(start_time: Instant) -> EndpointResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    })
    .to_string();

    EndpointResponse::json(200, body)
}

/// Readiness: 200 when the store answers, 503 otherwise
pub async fn handle_ready(store: &dyn Store) -> EndpointResponse {
    let (status, store_status, error) = match store.health_check().await {
        Ok(()) => (200, "ready", None),
        Err(e) => {
            tracing::warn!(error = %e, backend = store.backend_name(), "Store health check failed");
            (503, "unavailable", Some(e.to_string()))
        }
    };

    let mut store_info = serde_json::json!({
        "status": store_status,
        "backend": store.backend_name(),
        "durable": store.is_durable(),
    });
    if let Some(error) = error {
        store_info["error"] = serde_json::Value::String(error);
    }

    let body = serde_json::json!({
        "status": if status == 200 { "ready" } else { "unavailable" },
        "store": store_info,
    })
    .to_string();

    EndpointResponse::json(status, body)
}

pub fn handle_metrics(metrics: &Metrics) -> EndpointResponse {
    EndpointResponse::prometheus(metrics.export_prometheus())
}
