//! Client-facing surface: the teller service (bind/status) and the HTTP
//! API it is served through, plus the optional metrics exposure server.

mod http;
mod metrics_server;
mod ratelimit;
mod service;

pub use http::{ApiConfig, ApiServer};
pub use metrics_server::MetricsServer;
pub use ratelimit::RateLimiter;
pub use service::{BoundAddress, TellerError, TellerService};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("http server error: {0}")]
    Server(String),

    #[error("metrics recorder error: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;
