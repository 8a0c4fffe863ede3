use std::collections::HashMap;
use std::sync::Arc;
use teller_addrs::{validate_mdl_address, AddressManager, AddrsError};
use teller_core::types::{BuyMethod, CoinType, DepositStatusEntry};
use teller_exchange::{ExchangeEngine, ExchangeError};
use teller_scanner::CoinScanner;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum TellerError {
    #[error("binding is disabled")]
    BindDisabled,

    #[error("coin type {0} is not enabled")]
    CoinDisabled(CoinType),

    #[error("invalid MDL address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Addrs(#[from] AddrsError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Result of a successful bind.
#[derive(Debug, Clone)]
pub struct BoundAddress {
    pub deposit_address: String,
    pub coin_type: CoinType,
    pub buy_method: BuyMethod,
}

/// Bind/status operations consumed by the HTTP layer. Depends on the
/// address manager (allocation) and the exchange engine (status reads);
/// neither depends back on it.
pub struct TellerService {
    addr_manager: Arc<AddressManager>,
    engine: Arc<ExchangeEngine>,
    scanners: HashMap<CoinType, Arc<CoinScanner>>,
    bind_enabled: bool,
    buy_method: BuyMethod,
}

impl TellerService {
    pub fn new(
        addr_manager: Arc<AddressManager>,
        engine: Arc<ExchangeEngine>,
        scanners: HashMap<CoinType, Arc<CoinScanner>>,
        bind_enabled: bool,
        buy_method: BuyMethod,
    ) -> Self {
        Self {
            addr_manager,
            engine,
            scanners,
            bind_enabled,
            buy_method,
        }
    }

    /// Bind an MDL address to a freshly allocated deposit address of the
    /// chosen coin. Allocation also registers the deposit address with
    /// the coin's scan set, in the same store transaction.
    pub fn bind(&self, mdl_address: &str, coin: CoinType) -> Result<BoundAddress, TellerError> {
        if !self.bind_enabled {
            return Err(TellerError::BindDisabled);
        }
        validate_mdl_address(mdl_address)
            .map_err(|e| TellerError::InvalidAddress(e.to_string()))?;
        if !self.scanners.contains_key(&coin) {
            return Err(TellerError::CoinDisabled(coin));
        }

        let bind = self
            .addr_manager
            .allocate(mdl_address, coin, self.buy_method)?;

        info!(
            mdl_address,
            coin = %coin,
            deposit_address = %bind.deposit_address,
            buy_method = %bind.buy_method,
            "Bound addresses"
        );

        Ok(BoundAddress {
            deposit_address: bind.deposit_address,
            coin_type: bind.coin_type,
            buy_method: bind.buy_method,
        })
    }

    /// Deposit statuses across all of the MDL address's binds.
    pub fn statuses(&self, mdl_address: &str) -> Result<Vec<DepositStatusEntry>, TellerError> {
        validate_mdl_address(mdl_address)
            .map_err(|e| TellerError::InvalidAddress(e.to_string()))?;
        Ok(self.engine.deposit_statuses(mdl_address)?)
    }

    pub fn engine(&self) -> &Arc<ExchangeEngine> {
        &self.engine
    }
}
