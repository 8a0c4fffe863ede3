use anyhow::Context;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teller_addrs::AddressManager;
use teller_api::{ApiConfig, ApiServer, MetricsServer, TellerService};
use teller_core::types::CoinType;
use teller_core::Config;
use teller_exchange::{DirectPassthrough, EngineConfig, ExchangeEngine};
use teller_scanner::{
    BtcClient, CoinClient, CoinScanner, EthClient, Multiplexer, ScanConfig, SkyClient, WavesClient,
};
use teller_sender::{MdlClient, RetrySender, TxSender};
use teller_store::Store;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SEND_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const SEND_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "teller")]
#[command(about = "MDL crypto-deposit teller")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "teller.toml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("teller: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    info!(config = %cli.config.display(), "MDL teller starting");

    let config =
        Arc::new(Config::from_file(&cli.config).context("failed to load configuration")?);

    let store = Arc::new(Store::open(&config.db_path).context("failed to open store")?);

    // Address pools are merged from the per-coin files at every startup.
    let addr_manager = Arc::new(AddressManager::new(
        store.clone(),
        config.teller.max_bound_addresses,
    ));
    for coin in config.enabled_coins() {
        let path = config
            .addresses_file_for(coin)
            .with_context(|| format!("no address file configured for {coin}"))?;
        let added = addr_manager
            .load_pool_file(coin, path)
            .with_context(|| format!("failed to load {coin} address pool"))?;
        let pool_size = store.address_pool(coin)?.len();
        info!(coin = %coin, added, pool_size, "Address pool ready");
    }

    // One broadcast shutdown signal for every task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let multiplexer = Arc::new(Multiplexer::new());
    let mut scanners: HashMap<CoinType, Arc<CoinScanner>> = HashMap::new();
    for coin in config.enabled_coins() {
        let rpc = config.rpc_for(coin);
        let client: Arc<dyn CoinClient> = match coin {
            CoinType::Btc => Arc::new(BtcClient::new(&rpc.url)),
            CoinType::Eth => Arc::new(EthClient::new(&rpc.url)),
            CoinType::Sky => Arc::new(SkyClient::new(&rpc.url)),
            CoinType::Waves => Arc::new(WavesClient::new(&rpc.url, None)),
            CoinType::WavesMdl => Arc::new(WavesClient::new(&rpc.url, rpc.asset_id.clone())),
        };
        let section = config.scanner_for(coin);
        let scanner = Arc::new(CoinScanner::new(
            store.clone(),
            coin,
            client,
            ScanConfig {
                scan_period: section.scan_period(),
                initial_scan_height: section.initial_scan_height,
                confirmations_required: section.confirmations_required,
            },
        ));
        let deposits = scanner
            .deposits()
            .context("scanner deposit stream already taken")?;
        multiplexer.add_scanner(coin, deposits)?;
        scanners.insert(coin, scanner);
    }
    if scanners.is_empty() {
        warn!("No coin scanners enabled; deposits will not be detected");
    }

    let mdl_client = MdlClient::new(&config.mdl_rpc.url, &config.mdl_rpc.wallet_id);
    let sender: Arc<dyn TxSender> = Arc::new(RetrySender::new(
        mdl_client,
        SEND_RETRY_BASE_DELAY,
        SEND_RETRY_MAX_DELAY,
        shutdown_rx.clone(),
    ));

    let rates: HashMap<CoinType, String> = CoinType::ALL
        .into_iter()
        .map(|coin| (coin, config.rate_for(coin).to_string()))
        .collect();
    let passthrough = Arc::new(DirectPassthrough::new(
        rates.clone(),
        config.exchanger.max_decimals,
    ));
    let engine = Arc::new(ExchangeEngine::new(
        store.clone(),
        sender,
        passthrough,
        EngineConfig {
            rates,
            max_decimals: config.exchanger.max_decimals,
            tx_confirmation_check_wait: config.exchanger.tx_confirmation_check_wait(),
            send_enabled: config.exchanger.send_enabled,
        },
    ));

    let service = Arc::new(TellerService::new(
        addr_manager,
        engine.clone(),
        scanners.clone(),
        config.teller.bind_enabled,
        config.exchanger.buy_method,
    ));
    let api = ApiServer::new(
        ApiConfig::from_config(&config),
        service,
        engine.clone(),
        config.clone(),
    );

    // First fatal task error wins and triggers shutdown with exit 1.
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(8);
    let mut tasks = Vec::new();

    for (coin, scanner) in &scanners {
        let coin = *coin;
        let scanner = scanner.clone();
        let fatal = fatal_tx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = scanner.run().await {
                let _ = fatal.send(format!("{coin} scanner failed: {e}")).await;
            }
        }));
    }

    let deposits = multiplexer
        .deposits()
        .context("multiplexer deposit stream already taken")?;
    {
        let engine = engine.clone();
        let fatal = fatal_tx.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = engine.run(deposits, shutdown).await {
                let _ = fatal.send(format!("exchange engine failed: {e}")).await;
            }
        }));
    }

    {
        let fatal = fatal_tx.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = api.run(shutdown).await {
                let _ = fatal.send(format!("http server failed: {e}")).await;
            }
        }));
    }

    if config.metrics.enabled {
        let metrics = MetricsServer::new(config.metrics.addr.clone());
        tokio::spawn(async move {
            if let Err(e) = metrics.run().await {
                error!(error = %e, "Metrics server error");
            }
        });
    }

    info!("All tasks started");

    let mut exit_err: Option<anyhow::Error> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        Some(msg) = fatal_rx.recv() => {
            error!(error = %msg, "Fatal task error, shutting down");
            exit_err = Some(anyhow::anyhow!(msg));
        }
    }

    let _ = shutdown_tx.send(true);
    for scanner in scanners.values() {
        scanner.shutdown();
    }
    multiplexer.shutdown().await;
    for task in tasks {
        let _ = task.await;
    }
    info!("Teller shutdown complete");

    match exit_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
