use crate::{ApiError, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

/// Optional Prometheus exposure for the teller's counters. Off by
/// default; enabled via `[metrics]` in the config.
pub struct MetricsServer {
    addr: String,
}

impl MetricsServer {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }

    pub async fn run(self) -> Result<()> {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ApiError::Metrics(e.to_string()))?;

        let app = Router::new()
            .route("/metrics", get(move || metrics_handler(handle.clone())))
            .route("/health", get(|| async { "OK" }));

        info!(address = %self.addr, "Metrics server listening");

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| ApiError::Server(e.to_string()))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| ApiError::Server(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler(handle: PrometheusHandle) -> String {
    handle.render()
}
