use crate::{Result, Store, StoreError};
use lmdb::{Cursor, RwTransaction, Transaction};
use serde::{Deserialize, Serialize};
use teller_core::types::{ChainBlock, CoinType, DepositEvent, DepositKey};
use tracing::debug;

const CURSOR_KEY: &[u8] = b"cursor";
const SCAN_ADDRESSES_KEY: &[u8] = b"scan_addresses";

/// A deposit detected by a scanner. `processed` flips once the exchange
/// has acknowledged the event; unprocessed deposits are re-emitted at
/// scanner startup so nothing is lost between emit and consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ScannedDeposit {
    pub event: DepositEvent,
    pub processed: bool,

    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn scanned_deposit_key(tx_id: &str, out_index: u32) -> Vec<u8> {
    format!("dv:{tx_id}:{out_index}").into_bytes()
}

impl Store {
    /// Next block height the coin's scanner should examine.
    pub fn scan_cursor(&self, coin: CoinType) -> Result<u64> {
        let txn = self.env().begin_ro_txn()?;
        Self::get_u64(&txn, self.scan_meta_db(coin), CURSOR_KEY)
    }

    /// Active scan-address set for the coin.
    pub fn scan_addresses(&self, coin: CoinType) -> Result<Vec<String>> {
        let txn = self.env().begin_ro_txn()?;
        Ok(Self::get_json(&txn, self.scan_meta_db(coin), SCAN_ADDRESSES_KEY)?.unwrap_or_default())
    }

    /// Add an address to the coin's scan set. Idempotent.
    pub fn add_scan_address(&self, coin: CoinType, address: &str) -> Result<()> {
        let mut txn = self.env().begin_rw_txn()?;
        self.add_scan_address_txn(&mut txn, coin, address)?;
        txn.commit()?;
        Ok(())
    }

    pub(crate) fn add_scan_address_txn(
        &self,
        txn: &mut RwTransaction<'_>,
        coin: CoinType,
        address: &str,
    ) -> Result<()> {
        let db = self.scan_meta_db(coin);
        let mut addrs: Vec<String> =
            Self::get_json(txn, db, SCAN_ADDRESSES_KEY)?.unwrap_or_default();
        if !addrs.iter().any(|a| a == address) {
            addrs.push(address.to_string());
            Self::put_json(txn, db, SCAN_ADDRESSES_KEY, &addrs)?;
        }
        Ok(())
    }

    /// Join a block's outputs against the coin's scan-address set, persist
    /// every match not yet known, and advance the cursor past the block —
    /// all in one transaction. Re-running the same block is a no-op, which
    /// is what makes crash-replay safe.
    ///
    /// Returns only the newly inserted deposits, in block order.
    pub fn scan_block(&self, coin: CoinType, block: &ChainBlock) -> Result<Vec<DepositEvent>> {
        let db = self.scan_meta_db(coin);
        let mut txn = self.env().begin_rw_txn()?;

        let addrs: Vec<String> = Self::get_json(&txn, db, SCAN_ADDRESSES_KEY)?.unwrap_or_default();
        let addr_set: std::collections::HashSet<&str> = addrs.iter().map(|a| a.as_str()).collect();

        let mut new_deposits = Vec::new();
        for tx in &block.transactions {
            for output in &tx.outputs {
                let Some(matched) = output
                    .addresses
                    .iter()
                    .find(|a| addr_set.contains(a.as_str()))
                else {
                    continue;
                };

                let key = scanned_deposit_key(&tx.tx_id, output.index);
                let known = match txn.get(db, &key) {
                    Ok(_) => true,
                    Err(lmdb::Error::NotFound) => false,
                    Err(e) => return Err(e.into()),
                };
                if known {
                    continue;
                }

                let event = DepositEvent {
                    coin_type: coin,
                    tx_id: tx.tx_id.clone(),
                    out_index: output.index,
                    address: matched.clone(),
                    amount: output.amount,
                    block_height: block.height,
                    block_hash: block.hash.clone(),
                    timestamp: block.timestamp,
                };
                let stored = ScannedDeposit {
                    event: event.clone(),
                    processed: false,
                    extra: Default::default(),
                };
                Self::put_json(&mut txn, db, &key, &stored)?;
                new_deposits.push(event);
            }
        }

        // Monotonic: replaying an old block never moves the cursor back.
        let cursor = Self::get_u64(&txn, db, CURSOR_KEY)?;
        Self::put_u64(&mut txn, db, CURSOR_KEY, cursor.max(block.height + 1))?;

        txn.commit()?;

        debug!(
            coin = %coin,
            height = block.height,
            deposits = new_deposits.len(),
            "Scanned block"
        );
        Ok(new_deposits)
    }

    /// Deposits persisted by `scan_block` but not yet acknowledged by the
    /// exchange, in key order.
    pub fn unprocessed_deposits(&self, coin: CoinType) -> Result<Vec<DepositEvent>> {
        let db = self.scan_meta_db(coin);
        let txn = self.env().begin_ro_txn()?;
        let prefix: &[u8] = b"dv:";
        let mut events = Vec::new();
        let mut cursor = txn.open_ro_cursor(db)?;
        for item in cursor.iter_from(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let stored: ScannedDeposit = serde_json::from_slice(value)?;
            if !stored.processed {
                events.push(stored.event);
            }
        }
        Ok(events)
    }

    /// Mark a scanned deposit as consumed by the exchange.
    pub fn set_deposit_processed(&self, key: &DepositKey) -> Result<()> {
        let db = self.scan_meta_db(key.coin_type);
        let storage_key = scanned_deposit_key(&key.tx_id, key.out_index);
        let mut txn = self.env().begin_rw_txn()?;

        let mut stored: ScannedDeposit = Self::get_json(&txn, db, &storage_key)?
            .ok_or_else(|| StoreError::ScanDepositMissing(key.storage_key()))?;
        stored.processed = true;
        Self::put_json(&mut txn, db, &storage_key, &stored)?;

        txn.commit()?;
        Ok(())
    }
}
