use crate::codec::validate_address;
use crate::{AddrsError, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use teller_core::types::{BindRecord, BuyMethod, CoinType};
use teller_store::Store;
use tracing::info;

/// Per-coin pools of pre-provisioned deposit addresses, allocated
/// exclusively to MDL recipients and never re-released.
pub struct AddressManager {
    store: Arc<Store>,
    max_bound: u32,
}

impl AddressManager {
    pub fn new(store: Arc<Store>, max_bound: u32) -> Self {
        Self { store, max_bound }
    }

    /// Load a newline-delimited address file into the coin's pool.
    pub fn load_pool_file(&self, coin: CoinType, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let addrs: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let added = self.load_pool(coin, addrs)?;
        info!(coin = %coin, path = %path.display(), added, "Loaded address pool file");
        Ok(added)
    }

    /// Validate and merge addresses into the pool. The whole batch is
    /// rejected on the first invalid or duplicated entry; addresses the
    /// pool already knows are kept as-is, so reloading a file is
    /// idempotent.
    pub fn load_pool(&self, coin: CoinType, addrs: Vec<String>) -> Result<usize> {
        if addrs.is_empty() {
            return Err(AddrsError::EmptyPool(coin));
        }

        // ETH matching is case-insensitive; store the canonical form.
        let addrs: Vec<String> = if coin == CoinType::Eth {
            addrs.into_iter().map(|a| a.to_lowercase()).collect()
        } else {
            addrs
        };

        let mut seen = HashSet::new();
        for addr in &addrs {
            if !seen.insert(addr.as_str()) {
                return Err(AddrsError::DuplicateAddress(addr.clone()));
            }
            validate_address(coin, addr)?;
        }

        Ok(self.store.load_address_pool(coin, &addrs)?)
    }

    /// Allocate the next unused deposit address of the coin to an MDL
    /// recipient, creating the bind in the same transaction.
    pub fn allocate(
        &self,
        mdl_address: &str,
        coin: CoinType,
        buy_method: BuyMethod,
    ) -> Result<BindRecord> {
        Ok(self
            .store
            .allocate_address(mdl_address, coin, buy_method, self.max_bound)?)
    }

    pub fn binds_for(&self, mdl_address: &str) -> Result<Vec<BindRecord>> {
        Ok(self.store.binds_for(mdl_address)?)
    }
}
