//! Teller configuration, loaded from a TOML file.
//!
//! Validation runs once at startup and collects every problem it finds so
//! an operator can fix a config in one pass instead of replaying failures.

use crate::error::{CoreError, Result};
use crate::rate::{parse_positive_rate, MAX_DROPLET_PRECISION};
use crate::types::{BuyMethod, CoinType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Where the LMDB database file is created.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Newline-delimited deposit address list, one file per coin.
    /// Required for every enabled coin.
    pub btc_addresses: Option<PathBuf>,
    pub eth_addresses: Option<PathBuf>,
    pub sky_addresses: Option<PathBuf>,
    pub waves_addresses: Option<PathBuf>,
    pub waves_mdl_addresses: Option<PathBuf>,

    #[serde(default)]
    pub teller: TellerSection,

    pub mdl_rpc: MdlRpcSection,

    #[serde(default)]
    pub btc_rpc: CoinRpcSection,
    #[serde(default)]
    pub eth_rpc: CoinRpcSection,
    #[serde(default)]
    pub sky_rpc: CoinRpcSection,
    #[serde(default)]
    pub waves_rpc: CoinRpcSection,
    #[serde(default)]
    pub waves_mdl_rpc: CoinRpcSection,

    #[serde(default)]
    pub btc_scanner: ScannerSection,
    #[serde(default)]
    pub eth_scanner: ScannerSection,
    #[serde(default)]
    pub sky_scanner: ScannerSection,
    #[serde(default)]
    pub waves_scanner: ScannerSection,
    #[serde(default)]
    pub waves_mdl_scanner: ScannerSection,

    pub exchanger: ExchangerSection,

    #[serde(default)]
    pub web: WebSection,

    #[serde(default)]
    pub metrics: MetricsSection,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("teller.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct TellerSection {
    /// Max deposit addresses one MDL address may bind across all coins.
    /// 0 means unbounded.
    #[serde(default = "default_max_bound")]
    pub max_bound_addresses: u32,
    #[serde(default = "default_true")]
    pub bind_enabled: bool,
}

fn default_max_bound() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for TellerSection {
    fn default() -> Self {
        Self {
            max_bound_addresses: default_max_bound(),
            bind_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MdlRpcSection {
    /// Base URL of the MDL node wallet API.
    pub url: String,
    /// Wallet id the hot wallet lives under on the node.
    pub wallet_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoinRpcSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    /// Waves asset id; only meaningful for the WAVES-MDL section.
    #[serde(default)]
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerSection {
    #[serde(default = "default_scan_period_secs")]
    pub scan_period_secs: u64,
    #[serde(default)]
    pub initial_scan_height: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations_required: u64,
}

fn default_scan_period_secs() -> u64 {
    20
}

fn default_confirmations() -> u64 {
    1
}

impl ScannerSection {
    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs)
    }
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            scan_period_secs: default_scan_period_secs(),
            initial_scan_height: 0,
            confirmations_required: default_confirmations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangerSection {
    /// Exchange rates: decimal or rational `a/b` strings.
    pub mdl_btc_exchange_rate: String,
    pub mdl_eth_exchange_rate: String,
    pub mdl_sky_exchange_rate: String,
    pub mdl_waves_exchange_rate: String,
    pub mdl_waves_mdl_exchange_rate: String,

    /// Decimal places MDL payouts are truncated to, 0..=6.
    #[serde(default = "default_max_decimals")]
    pub max_decimals: u32,

    /// How long to wait between transaction confirmation checks.
    #[serde(default = "default_confirmation_wait_secs")]
    pub tx_confirmation_check_wait_secs: u64,

    /// When false, deposits are still received and recorded but no coins
    /// are sent; records park in waiting_send.
    #[serde(default = "default_true")]
    pub send_enabled: bool,

    #[serde(default)]
    pub buy_method: BuyMethod,

    /// Hot wallet file on disk; required when send_enabled.
    pub wallet: Option<PathBuf>,
}

fn default_max_decimals() -> u32 {
    3
}

fn default_confirmation_wait_secs() -> u64 {
    5
}

impl ExchangerSection {
    pub fn tx_confirmation_check_wait(&self) -> Duration {
        Duration::from_secs(self.tx_confirmation_check_wait_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// Max requests per IP per throttle window on bind/status.
    #[serde(default = "default_throttle_max")]
    pub throttle_max: u32,
    #[serde(default = "default_throttle_duration_secs")]
    pub throttle_duration_secs: u64,
    /// Trust X-Forwarded-For for client IPs.
    #[serde(default)]
    pub behind_proxy: bool,
}

fn default_http_addr() -> String {
    "127.0.0.1:7071".to_string()
}

fn default_throttle_max() -> u32 {
    60
}

fn default_throttle_duration_secs() -> u64 {
    60
}

impl WebSection {
    pub fn throttle_duration(&self) -> Duration {
        Duration::from_secs(self.throttle_duration_secs)
    }
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            throttle_max: default_throttle_max(),
            throttle_duration_secs: default_throttle_duration_secs(),
            behind_proxy: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9401".to_string()
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn rpc_for(&self, coin: CoinType) -> &CoinRpcSection {
        match coin {
            CoinType::Btc => &self.btc_rpc,
            CoinType::Eth => &self.eth_rpc,
            CoinType::Sky => &self.sky_rpc,
            CoinType::Waves => &self.waves_rpc,
            CoinType::WavesMdl => &self.waves_mdl_rpc,
        }
    }

    pub fn scanner_for(&self, coin: CoinType) -> &ScannerSection {
        match coin {
            CoinType::Btc => &self.btc_scanner,
            CoinType::Eth => &self.eth_scanner,
            CoinType::Sky => &self.sky_scanner,
            CoinType::Waves => &self.waves_scanner,
            CoinType::WavesMdl => &self.waves_mdl_scanner,
        }
    }

    pub fn addresses_file_for(&self, coin: CoinType) -> Option<&Path> {
        match coin {
            CoinType::Btc => self.btc_addresses.as_deref(),
            CoinType::Eth => self.eth_addresses.as_deref(),
            CoinType::Sky => self.sky_addresses.as_deref(),
            CoinType::Waves => self.waves_addresses.as_deref(),
            CoinType::WavesMdl => self.waves_mdl_addresses.as_deref(),
        }
    }

    pub fn rate_for(&self, coin: CoinType) -> &str {
        match coin {
            CoinType::Btc => &self.exchanger.mdl_btc_exchange_rate,
            CoinType::Eth => &self.exchanger.mdl_eth_exchange_rate,
            CoinType::Sky => &self.exchanger.mdl_sky_exchange_rate,
            CoinType::Waves => &self.exchanger.mdl_waves_exchange_rate,
            CoinType::WavesMdl => &self.exchanger.mdl_waves_mdl_exchange_rate,
        }
    }

    pub fn coin_enabled(&self, coin: CoinType) -> bool {
        self.rpc_for(coin).enabled
    }

    pub fn enabled_coins(&self) -> Vec<CoinType> {
        CoinType::ALL
            .into_iter()
            .filter(|c| self.coin_enabled(*c))
            .collect()
    }

    /// Validate the whole config, collecting every error found.
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        let mut oops = |msg: String| errs.push(msg);

        if self.mdl_rpc.url.is_empty() {
            oops("mdl_rpc.url missing".into());
        }
        if self.mdl_rpc.wallet_id.is_empty() {
            oops("mdl_rpc.wallet_id missing".into());
        }

        for coin in CoinType::ALL {
            let suffix = coin.bucket_suffix();
            let rpc = self.rpc_for(coin);
            if !rpc.enabled {
                continue;
            }

            if rpc.url.is_empty() {
                oops(format!("{suffix}_rpc.url missing"));
            }
            match self.addresses_file_for(coin) {
                None => oops(format!("{suffix}_addresses missing")),
                Some(path) if !path.exists() => {
                    oops(format!("{suffix}_addresses file does not exist"))
                }
                Some(_) => {}
            }
            if coin == CoinType::WavesMdl && rpc.asset_id.is_none() {
                oops("waves_mdl_rpc.asset_id missing".into());
            }
        }

        for coin in CoinType::ALL {
            if let Err(e) = parse_positive_rate(self.rate_for(coin)) {
                oops(format!(
                    "exchanger.mdl_{}_exchange_rate invalid: {e}",
                    coin.bucket_suffix()
                ));
            }
        }

        if self.exchanger.max_decimals > MAX_DROPLET_PRECISION {
            oops(format!(
                "exchanger.max_decimals is larger than the droplet precision {MAX_DROPLET_PRECISION}"
            ));
        }

        if self.exchanger.send_enabled && self.exchanger.wallet.is_none() {
            oops("exchanger.wallet missing".into());
        }

        if self.web.http_addr.is_empty() {
            oops("web.http_addr missing".into());
        }
        if self.web.throttle_max == 0 {
            oops("web.throttle_max must be greater than zero".into());
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ConfigInvalid(errs.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [mdl_rpc]
        url = "http://127.0.0.1:6420"
        wallet_id = "hot.wlt"

        [exchanger]
        mdl_btc_exchange_rate = "500"
        mdl_eth_exchange_rate = "1568"
        mdl_sky_exchange_rate = "1/2"
        mdl_waves_exchange_rate = "88"
        mdl_waves_mdl_exchange_rate = "1"
        wallet = "hot.wlt"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.teller.max_bound_addresses, 2);
        assert!(config.teller.bind_enabled);
        assert_eq!(config.btc_scanner.scan_period_secs, 20);
        assert_eq!(config.exchanger.max_decimals, 3);
        assert_eq!(config.web.http_addr, "127.0.0.1:7071");
        assert!(config.enabled_coins().is_empty());
    }

    #[test]
    fn collects_all_validation_errors() {
        let raw = MINIMAL
            .replace("\"500\"", "\"12k\"")
            .replace("\"1/2\"", "\"0\"");
        let config: Config = toml::from_str(&raw).unwrap();

        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mdl_btc_exchange_rate"));
        assert!(msg.contains("mdl_sky_exchange_rate"));
    }

    #[test]
    fn enabled_coin_requires_url_and_addresses() {
        let raw = format!(
            "{MINIMAL}\n[btc_rpc]\nenabled = true\n"
        );
        let config: Config = toml::from_str(&raw).unwrap();

        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("btc_rpc.url missing"));
        assert!(msg.contains("btc_addresses missing"));
    }

    #[test]
    fn max_decimals_bounded_by_droplet_precision() {
        let raw = format!("{MINIMAL}\n");
        let mut config: Config = toml::from_str(&raw).unwrap();
        config.exchanger.max_decimals = 7;
        assert!(config.validate().is_err());
    }
}
