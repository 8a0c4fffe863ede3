use crate::{Result, Store, StoreError};
use lmdb::{Cursor, Transaction};
use teller_core::types::{
    now_unix, BindRecord, DepositEvent, DepositKey, DepositRecord, DepositStatus,
};
use tracing::debug;

const SEQ_KEY: &[u8] = b"seq";

impl Store {
    /// Create the exchange-level record for a deposit, idempotently: a
    /// second delivery of the same `(coin, tx, out)` returns the existing
    /// record untouched. The sequence counter is bumped in the same
    /// transaction as the insert.
    pub fn create_deposit_record(
        &self,
        event: &DepositEvent,
        bind: &BindRecord,
    ) -> Result<(DepositRecord, bool)> {
        let db = self.deposits_db();
        let key = event.key().storage_key();
        let mut txn = self.env().begin_rw_txn()?;

        if let Some(existing) = Self::get_json(&txn, db, key.as_bytes())? {
            return Ok((existing, false));
        }

        let seq = Self::get_u64(&txn, db, SEQ_KEY)? + 1;
        Self::put_u64(&mut txn, db, SEQ_KEY, seq)?;

        let now = now_unix();
        let record = DepositRecord {
            seq,
            coin_type: event.coin_type,
            tx_id: event.tx_id.clone(),
            out_index: event.out_index,
            status: DepositStatus::WaitingDecide,
            error: None,
            amount: event.amount,
            mdl_droplets: 0,
            mdl_sent: 0,
            mdl_tx_id: None,
            rate: None,
            bind: bind.clone(),
            created_at: now,
            updated_at: now,
            extra: Default::default(),
        };
        Self::put_json(&mut txn, db, key.as_bytes(), &record)?;

        txn.commit()?;
        debug!(key = %key, seq, "Created deposit record");
        Ok((record, true))
    }

    pub fn get_deposit_record(&self, key: &DepositKey) -> Result<Option<DepositRecord>> {
        let txn = self.env().begin_ro_txn()?;
        Self::get_json(&txn, self.deposits_db(), key.storage_key().as_bytes())
    }

    /// Apply a mutation to a record inside one transaction. Finalized
    /// records are immutable; attempting to touch one is an error.
    pub fn update_deposit_record<F>(&self, key: &DepositKey, mutate: F) -> Result<DepositRecord>
    where
        F: FnOnce(&mut DepositRecord),
    {
        let db = self.deposits_db();
        let storage_key = key.storage_key();
        let mut txn = self.env().begin_rw_txn()?;

        let mut record: DepositRecord = Self::get_json(&txn, db, storage_key.as_bytes())?
            .ok_or_else(|| StoreError::RecordMissing(storage_key.clone()))?;
        if record.status == DepositStatus::Done {
            return Err(StoreError::RecordFinalized(storage_key));
        }

        mutate(&mut record);
        record.updated_at = now_unix();
        Self::put_json(&mut txn, db, storage_key.as_bytes(), &record)?;

        txn.commit()?;
        Ok(record)
    }

    /// Every record not yet `done`, ordered by sequence.
    pub fn pending_deposit_records(&self) -> Result<Vec<DepositRecord>> {
        self.filtered_records(|r| r.status != DepositStatus::Done)
    }

    /// Every record whose bind belongs to the given MDL address.
    pub fn deposit_records_for(&self, mdl_address: &str) -> Result<Vec<DepositRecord>> {
        self.filtered_records(|r| r.bind.mdl_address == mdl_address)
    }

    fn filtered_records<F>(&self, keep: F) -> Result<Vec<DepositRecord>>
    where
        F: Fn(&DepositRecord) -> bool,
    {
        let db = self.deposits_db();
        let txn = self.env().begin_ro_txn()?;
        let mut records = Vec::new();
        let mut cursor = txn.open_ro_cursor(db)?;
        for item in cursor.iter_start() {
            let (key, value) = item?;
            if key == SEQ_KEY {
                continue;
            }
            let record: DepositRecord = serde_json::from_slice(value)?;
            if keep(&record) {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use teller_core::types::{BuyMethod, ChainBlock, ChainOutput, ChainTx, CoinType};
    use tempfile::tempdir;

    fn open_store(dir: &std::path::Path) -> Store {
        Store::open(&dir.join("teller.db")).unwrap()
    }

    fn block(height: u64, txs: Vec<(&str, Vec<(u32, i128, &str)>)>) -> ChainBlock {
        ChainBlock {
            height,
            hash: format!("hash-{height}"),
            timestamp: 1_700_000_000,
            transactions: txs
                .into_iter()
                .map(|(tx_id, outputs)| ChainTx {
                    tx_id: tx_id.to_string(),
                    outputs: outputs
                        .into_iter()
                        .map(|(index, amount, addr)| ChainOutput {
                            index,
                            amount,
                            addresses: vec![addr.to_string()],
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn pool(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("addr-{i}")).collect()
    }

    #[test]
    fn allocate_returns_each_address_once_in_order() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_address_pool(CoinType::Btc, &pool(3)).unwrap();

        let mut seen = Vec::new();
        for i in 0..3 {
            let bind = store
                .allocate_address(&format!("mdl-{i}"), CoinType::Btc, BuyMethod::Direct, 0)
                .unwrap();
            seen.push(bind.deposit_address);
        }
        assert_eq!(seen, pool(3));

        assert!(matches!(
            store.allocate_address("mdl-x", CoinType::Btc, BuyMethod::Direct, 0),
            Err(StoreError::PoolExhausted(CoinType::Btc))
        ));
    }

    #[test]
    fn max_bound_is_enforced() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_address_pool(CoinType::Btc, &pool(3)).unwrap();

        let a = store
            .allocate_address("mdl-a", CoinType::Btc, BuyMethod::Direct, 2)
            .unwrap();
        let b = store
            .allocate_address("mdl-a", CoinType::Btc, BuyMethod::Direct, 2)
            .unwrap();
        assert_ne!(a.deposit_address, b.deposit_address);

        assert!(matches!(
            store.allocate_address("mdl-a", CoinType::Btc, BuyMethod::Direct, 2),
            Err(StoreError::MaxBoundExceeded(_))
        ));

        // 0 means unbounded
        store
            .allocate_address("mdl-b", CoinType::Btc, BuyMethod::Direct, 0)
            .unwrap();
    }

    #[test]
    fn pool_reload_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        assert_eq!(store.load_address_pool(CoinType::Sky, &pool(3)).unwrap(), 3);

        let bind = store
            .allocate_address("mdl-a", CoinType::Sky, BuyMethod::Direct, 0)
            .unwrap();

        // Reloading the same file adds nothing and keeps the used flag.
        assert_eq!(store.load_address_pool(CoinType::Sky, &pool(3)).unwrap(), 0);
        let entries = store.address_pool(CoinType::Sky).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].used);
        assert_eq!(entries[0].mdl_address.as_deref(), Some("mdl-a"));
        assert_eq!(bind.deposit_address, entries[0].address);
    }

    #[test]
    fn allocation_registers_scan_address_atomically() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_address_pool(CoinType::Waves, &pool(1)).unwrap();

        let bind = store
            .allocate_address("mdl-a", CoinType::Waves, BuyMethod::Direct, 0)
            .unwrap();
        assert_eq!(
            store.scan_addresses(CoinType::Waves).unwrap(),
            vec![bind.deposit_address.clone()]
        );
        assert_eq!(
            store
                .bind_for_deposit_address(CoinType::Waves, &bind.deposit_address)
                .unwrap()
                .unwrap()
                .mdl_address,
            "mdl-a"
        );
    }

    #[test]
    fn scan_block_is_idempotent_and_cursor_monotonic() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let store = open_store(&path);
        store.add_scan_address(CoinType::Btc, "watch-1").unwrap();

        let b = block(100, vec![("tx-1", vec![(0, 200_000, "watch-1")])]);
        let first = store.scan_block(CoinType::Btc, &b).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(store.scan_cursor(CoinType::Btc).unwrap(), 101);

        // Replay of the same block after a simulated crash: no new
        // deposits, cursor unchanged.
        let replay = store.scan_block(CoinType::Btc, &b).unwrap();
        assert!(replay.is_empty());
        assert_eq!(store.scan_cursor(CoinType::Btc).unwrap(), 101);

        // Cursor survives a reopen.
        drop(store);
        let store = open_store(&path);
        assert_eq!(store.scan_cursor(CoinType::Btc).unwrap(), 101);
        assert_eq!(store.unprocessed_deposits(CoinType::Btc).unwrap().len(), 1);
    }

    #[test]
    fn processed_flag_clears_replay_queue() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.add_scan_address(CoinType::Sky, "watch-1").unwrap();

        let b = block(5, vec![("tx-9", vec![(1, 1_000_000, "watch-1")])]);
        let events = store.scan_block(CoinType::Sky, &b).unwrap();
        store.set_deposit_processed(&events[0].key()).unwrap();
        assert!(store.unprocessed_deposits(CoinType::Sky).unwrap().is_empty());
    }

    #[test]
    fn deposit_record_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_address_pool(CoinType::Btc, &pool(1)).unwrap();
        let bind = store
            .allocate_address("mdl-a", CoinType::Btc, BuyMethod::Direct, 0)
            .unwrap();

        let b = block(1, vec![("tx-1", vec![(0, 5_000, "addr-0")])]);
        store.add_scan_address(CoinType::Btc, "addr-0").unwrap();
        let events = store.scan_block(CoinType::Btc, &b).unwrap();

        let (rec, created) = store.create_deposit_record(&events[0], &bind).unwrap();
        assert!(created);
        assert_eq!(rec.seq, 1);
        assert_eq!(rec.status, DepositStatus::WaitingDecide);

        let (again, created) = store.create_deposit_record(&events[0], &bind).unwrap();
        assert!(!created);
        assert_eq!(again.seq, 1);
    }

    #[test]
    fn finalized_records_are_immutable() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_address_pool(CoinType::Btc, &pool(1)).unwrap();
        let bind = store
            .allocate_address("mdl-a", CoinType::Btc, BuyMethod::Direct, 0)
            .unwrap();
        store.add_scan_address(CoinType::Btc, "addr-0").unwrap();

        let b = block(1, vec![("tx-1", vec![(0, 5_000, "addr-0")])]);
        let events = store.scan_block(CoinType::Btc, &b).unwrap();
        let (rec, _) = store.create_deposit_record(&events[0], &bind).unwrap();

        store
            .update_deposit_record(&rec.key(), |r| r.status = DepositStatus::Done)
            .unwrap();
        assert!(matches!(
            store.update_deposit_record(&rec.key(), |r| r.mdl_sent = 1),
            Err(StoreError::RecordFinalized(_))
        ));
        assert!(store.pending_deposit_records().unwrap().is_empty());
    }
}
