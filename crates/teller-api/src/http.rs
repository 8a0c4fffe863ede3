//! HTTP API: bind, status, config, exchange-status.
//!
//! All bodies are JSON; errors are `{"error":{"message","code"}}` with
//! 400 for malformed or unsupported input, 403 when binding is disabled,
//! 405 for wrong methods, and a redacted 500 for internal failures.

use crate::ratelimit::{rate_limit, RateLimiter};
use crate::service::{TellerError, TellerService};
use crate::{ApiError, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teller_addrs::AddrsError;
use teller_core::rate::droplets_to_string;
use teller_core::types::{BuyMethod, CoinType, DepositStatusEntry};
use teller_core::Config;
use teller_exchange::{calculate_mdl_value, ExchangeEngine};
use teller_store::StoreError;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub http_addr: String,
    pub throttle_max: u32,
    pub throttle_duration: Duration,
    pub behind_proxy: bool,
}

impl ApiConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http_addr: config.web.http_addr.clone(),
            throttle_max: config.web.throttle_max,
            throttle_duration: config.web.throttle_duration(),
            behind_proxy: config.web.behind_proxy,
        }
    }
}

#[derive(Clone)]
struct AppState {
    service: Arc<TellerService>,
    engine: Arc<ExchangeEngine>,
    config: Arc<Config>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        service: Arc<TellerService>,
        engine: Arc<ExchangeEngine>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            cfg,
            state: AppState {
                service,
                engine,
                config,
            },
        }
    }

    /// Serve until shutdown is signalled; in-flight requests get at most
    /// five seconds to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let limiter = Arc::new(RateLimiter::new(
            self.cfg.throttle_max,
            self.cfg.throttle_duration,
            self.cfg.behind_proxy,
        ));

        let throttled = Router::new()
            .route(
                "/api/bind",
                post(bind_handler).fallback(method_not_allowed),
            )
            .route(
                "/api/status",
                get(status_handler).fallback(method_not_allowed),
            )
            .layer(middleware::from_fn_with_state(limiter, rate_limit));

        let app = Router::new()
            .merge(throttled)
            .route(
                "/api/config",
                get(config_handler).fallback(method_not_allowed),
            )
            .route(
                "/api/exchange-status",
                get(exchange_status_handler).fallback(method_not_allowed),
            )
            .route("/health", get(|| async { "OK" }))
            .fallback(not_found)
            .with_state(self.state)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http());

        let listener = tokio::net::TcpListener::bind(&self.cfg.http_addr)
            .await
            .map_err(|e| ApiError::Server(e.to_string()))?;
        info!(address = %self.cfg.http_addr, "HTTP server listening");

        let mut graceful_rx = shutdown.clone();
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = graceful_rx.changed().await;
        });

        let mut server_task = tokio::spawn(server.into_future());

        tokio::select! {
            joined = &mut server_task => {
                joined
                    .map_err(|e| ApiError::Server(e.to_string()))?
                    .map_err(|e| ApiError::Server(e.to_string()))
            }
            _ = shutdown.changed() => {
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server_task).await {
                    Ok(joined) => {
                        joined
                            .map_err(|e| ApiError::Server(e.to_string()))?
                            .map_err(|e| ApiError::Server(e.to_string()))?;
                    }
                    Err(_) => {
                        warn!("HTTP graceful shutdown timed out, aborting");
                        server_task.abort();
                    }
                }
                info!("HTTP server stopped");
                Ok(())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    code: u16,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                message: message.into(),
                code: status.as_u16(),
            },
        }),
    )
        .into_response()
}

fn internal_error_response() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Invalid request method")
}

#[derive(Debug, Deserialize)]
struct BindRequest {
    #[serde(default)]
    mdladdr: String,
    #[serde(default)]
    coin_type: String,
}

#[derive(Debug, Serialize)]
struct BindResponse {
    deposit_address: String,
    coin_type: CoinType,
    buy_method: BuyMethod,
}

async fn bind_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<BindRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid json request body: {rejection}"),
            )
        }
    };

    let mdladdr = request.mdladdr.trim();
    if mdladdr.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing mdladdr");
    }

    let coin_type = request.coin_type.trim();
    if coin_type.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing coin_type");
    }
    let Ok(coin) = coin_type.parse::<CoinType>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid coin_type");
    };

    match state.service.bind(mdladdr, coin) {
        Ok(bound) => Json(BindResponse {
            deposit_address: bound.deposit_address,
            coin_type: bound.coin_type,
            buy_method: bound.buy_method,
        })
        .into_response(),
        Err(e) => teller_error_response(e),
    }
}

fn teller_error_response(err: TellerError) -> Response {
    match &err {
        TellerError::BindDisabled => error_response(StatusCode::FORBIDDEN, err.to_string()),
        TellerError::CoinDisabled(_) | TellerError::InvalidAddress(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        TellerError::Addrs(AddrsError::Store(
            StoreError::PoolExhausted(_) | StoreError::MaxBoundExceeded(_),
        )) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        _ => {
            error!(error = %err, "Teller service failure");
            internal_error_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    mdladdr: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    statuses: Vec<StatusEntryResponse>,
}

#[derive(Debug, Serialize)]
struct StatusEntryResponse {
    seq: u64,
    updated_at: i64,
    status: String,
}

impl From<DepositStatusEntry> for StatusEntryResponse {
    fn from(entry: DepositStatusEntry) -> Self {
        Self {
            seq: entry.seq,
            updated_at: entry.updated_at,
            status: entry.status.to_string(),
        }
    }
}

async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let mdladdr = query.mdladdr.trim();
    if mdladdr.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing mdladdr");
    }

    match state.service.statuses(mdladdr) {
        Ok(statuses) => Json(StatusResponse {
            statuses: statuses.into_iter().map(Into::into).collect(),
        })
        .into_response(),
        Err(e) => teller_error_response(e),
    }
}

#[derive(Debug, Serialize)]
struct SupportedCoin {
    name: String,
    enabled: bool,
    exchange_rate: String,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    enabled: bool,
    available: f64,
    btc_confirmations_required: u64,
    eth_confirmations_required: u64,
    max_bound_addresses: u32,
    mdl_btc_exchange_rate: String,
    mdl_eth_exchange_rate: String,
    mdl_sky_exchange_rate: String,
    mdl_waves_exchange_rate: String,
    mdl_waves_mdl_exchange_rate: String,
    max_decimals: u32,
    supported: Vec<SupportedCoin>,
}

/// MDL paid per one whole unit of the coin, as a fixed-point string.
fn mdl_per_coin(config: &Config, coin: CoinType) -> Option<String> {
    let droplets = calculate_mdl_value(
        coin.native_unit_scale(),
        coin,
        config.rate_for(coin),
        config.exchanger.max_decimals,
    )
    .ok()?;
    Some(droplets_to_string(droplets))
}

async fn config_handler(State(state): State<AppState>) -> Response {
    let config = &state.config;

    let mut rates = Vec::with_capacity(CoinType::ALL.len());
    for coin in CoinType::ALL {
        match mdl_per_coin(config, coin) {
            Some(rate) => rates.push(rate),
            None => {
                error!(coin = %coin, "Failed to compute MDL rate");
                return internal_error_response();
            }
        }
    }

    let available = match state.engine.balance().await {
        Ok(balance) => balance.coins.parse::<f64>().unwrap_or(0.0),
        Err(_) => 0.0,
    };

    let supported = CoinType::ALL
        .into_iter()
        .map(|coin| SupportedCoin {
            name: coin.as_str().to_string(),
            enabled: config.coin_enabled(coin),
            exchange_rate: config.rate_for(coin).to_string(),
        })
        .collect();

    Json(ConfigResponse {
        enabled: config.teller.bind_enabled,
        available,
        btc_confirmations_required: config.btc_scanner.confirmations_required,
        eth_confirmations_required: config.eth_scanner.confirmations_required,
        max_bound_addresses: config.teller.max_bound_addresses,
        mdl_btc_exchange_rate: rates[0].clone(),
        mdl_eth_exchange_rate: rates[1].clone(),
        mdl_sky_exchange_rate: rates[2].clone(),
        mdl_waves_exchange_rate: rates[3].clone(),
        mdl_waves_mdl_exchange_rate: rates[4].clone(),
        max_decimals: config.exchanger.max_decimals,
        supported,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct ExchangeStatusResponse {
    error: String,
    balance: ExchangeStatusBalance,
}

#[derive(Debug, Serialize)]
struct ExchangeStatusBalance {
    coins: String,
    hours: String,
}

async fn exchange_status_handler(State(state): State<AppState>) -> Response {
    // Balance errors are not surfaced; a zero balance with the error
    // field set tells the client everything it needs.
    let (coins, hours) = match state.engine.balance().await {
        Ok(balance) => (balance.coins, balance.hours),
        Err(e) => {
            warn!(error = %e, "Failed to fetch wallet balance");
            ("0.000000".to_string(), "0".to_string())
        }
    };

    Json(ExchangeStatusResponse {
        error: state.engine.status().unwrap_or_default(),
        balance: ExchangeStatusBalance { coins, hours },
    })
    .into_response()
}
