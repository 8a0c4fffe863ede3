use crate::{Result, Store, StoreError};
use lmdb::{Cursor, Transaction};
use serde::{Deserialize, Serialize};
use teller_core::types::{now_unix, BindRecord, BuyMethod, CoinType};
use tracing::debug;

/// One pooled deposit address. Keyed by a big-endian insertion index so
/// LMDB's lexicographic iteration preserves insertion order, which makes
/// "first unused" allocation deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    pub used: bool,
    /// Recipient this address was allocated to, once used.
    pub mdl_address: Option<String>,

    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn index_key(index: u32) -> [u8; 4] {
    index.to_be_bytes()
}

fn bind_key(mdl_address: &str, index: u32) -> Vec<u8> {
    format!("m:{mdl_address}:{index:08}").into_bytes()
}

fn bind_prefix(mdl_address: &str) -> Vec<u8> {
    format!("m:{mdl_address}:").into_bytes()
}

fn deposit_addr_key(coin: CoinType, address: &str) -> Vec<u8> {
    format!("d:{coin}:{address}").into_bytes()
}

impl Store {
    /// Merge a list of addresses into the coin's pool. Addresses already
    /// present keep their state; new ones are appended unused. All or
    /// nothing.
    pub fn load_address_pool(&self, coin: CoinType, addrs: &[String]) -> Result<usize> {
        let db = self.deposit_addresses_db(coin);
        let mut txn = self.env().begin_rw_txn()?;

        let (mut known, mut next_index) = {
            let mut known = std::collections::HashSet::new();
            let mut count = 0u32;
            let mut cursor = txn.open_ro_cursor(db)?;
            for item in cursor.iter_start() {
                let (_, value) = item?;
                let entry: AddressEntry = serde_json::from_slice(value)?;
                known.insert(entry.address);
                count += 1;
            }
            (known, count)
        };

        let mut added = 0usize;
        for address in addrs {
            if known.contains(address) {
                continue;
            }
            let entry = AddressEntry {
                address: address.clone(),
                used: false,
                mdl_address: None,
                extra: Default::default(),
            };
            Self::put_json(&mut txn, db, &index_key(next_index), &entry)?;
            known.insert(address.clone());
            next_index += 1;
            added += 1;
        }

        txn.commit()?;
        debug!(coin = %coin, added, total = next_index, "Loaded deposit address pool");
        Ok(added)
    }

    /// Full pool contents in insertion order.
    pub fn address_pool(&self, coin: CoinType) -> Result<Vec<AddressEntry>> {
        let db = self.deposit_addresses_db(coin);
        let txn = self.env().begin_ro_txn()?;
        let mut entries = Vec::new();
        let mut cursor = txn.open_ro_cursor(db)?;
        for item in cursor.iter_start() {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value)?);
        }
        Ok(entries)
    }

    /// Atomically: pick the first unused address of the coin, mark it
    /// used, create the bind record (plus its reverse index), and register
    /// the address in the coin's scan set. A crash can never leave a
    /// bound address unscanned or an allocated address unbound.
    pub fn allocate_address(
        &self,
        mdl_address: &str,
        coin: CoinType,
        buy_method: BuyMethod,
        max_bound: u32,
    ) -> Result<BindRecord> {
        let addrs_db = self.deposit_addresses_db(coin);
        let binds_db = self.binds_db();
        let mut txn = self.env().begin_rw_txn()?;

        let bind_count = {
            let prefix = bind_prefix(mdl_address);
            let mut cursor = txn.open_ro_cursor(binds_db)?;
            let mut count = 0u32;
            for item in cursor.iter_from(prefix.as_slice()) {
                let (key, _) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                count += 1;
            }
            count
        };
        if max_bound > 0 && bind_count >= max_bound {
            return Err(StoreError::MaxBoundExceeded(mdl_address.to_string()));
        }

        let free = {
            let mut cursor = txn.open_ro_cursor(addrs_db)?;
            let mut found = None;
            for item in cursor.iter_start() {
                let (key, value) = item?;
                let entry: AddressEntry = serde_json::from_slice(value)?;
                if !entry.used {
                    found = Some((key.to_vec(), entry));
                    break;
                }
            }
            found
        };
        let (key, mut entry) = free.ok_or(StoreError::PoolExhausted(coin))?;

        entry.used = true;
        entry.mdl_address = Some(mdl_address.to_string());
        Self::put_json(&mut txn, addrs_db, &key, &entry)?;

        let bind = BindRecord {
            mdl_address: mdl_address.to_string(),
            coin_type: coin,
            deposit_address: entry.address.clone(),
            buy_method,
            created_at: now_unix(),
            extra: Default::default(),
        };
        Self::put_json(&mut txn, binds_db, &bind_key(mdl_address, bind_count), &bind)?;
        Self::put_json(
            &mut txn,
            binds_db,
            &deposit_addr_key(coin, &entry.address),
            &bind,
        )?;

        self.add_scan_address_txn(&mut txn, coin, &entry.address)?;

        txn.commit()?;
        debug!(
            coin = %coin,
            mdl_address,
            deposit_address = %bind.deposit_address,
            "Allocated deposit address"
        );
        Ok(bind)
    }

    /// All binds of one MDL address, in creation order.
    pub fn binds_for(&self, mdl_address: &str) -> Result<Vec<BindRecord>> {
        let db = self.binds_db();
        let txn = self.env().begin_ro_txn()?;
        let prefix = bind_prefix(mdl_address);
        let mut binds = Vec::new();
        let mut cursor = txn.open_ro_cursor(db)?;
        for item in cursor.iter_from(prefix.as_slice()) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            binds.push(serde_json::from_slice(value)?);
        }
        Ok(binds)
    }

    /// Reverse lookup used by the exchange intake: which bind published
    /// this deposit address.
    pub fn bind_for_deposit_address(
        &self,
        coin: CoinType,
        address: &str,
    ) -> Result<Option<BindRecord>> {
        let txn = self.env().begin_ro_txn()?;
        Self::get_json(&txn, self.binds_db(), &deposit_addr_key(coin, address))
    }
}
