use crate::{Result, StoreError};
use lmdb::{Database, DatabaseFlags, Environment, EnvironmentFlags, RwTransaction, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use teller_core::types::CoinType;
use tracing::info;

const MAP_SIZE: usize = 256 * 1024 * 1024;

/// Embedded KV store. Buckets are LMDB named databases, created
/// idempotently at open; an existing database is never truncated.
pub struct Store {
    env: Environment,
    deposit_addresses: HashMap<CoinType, Database>,
    scan_meta: HashMap<CoinType, Database>,
    deposits: Database,
    binds: Database,
}

impl Store {
    /// Open (or create) the database file and all buckets.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(16)
            .set_map_size(MAP_SIZE)
            .open(path)?;

        let mut deposit_addresses = HashMap::new();
        let mut scan_meta = HashMap::new();
        for coin in CoinType::ALL {
            let addrs_name = format!("deposit_addresses_{}", coin.bucket_suffix());
            let meta_name = format!("scan_meta_{}", coin.bucket_suffix());
            deposit_addresses.insert(
                coin,
                env.create_db(Some(addrs_name.as_str()), DatabaseFlags::empty())?,
            );
            scan_meta.insert(
                coin,
                env.create_db(Some(meta_name.as_str()), DatabaseFlags::empty())?,
            );
        }

        let deposits = env.create_db(Some("deposits"), DatabaseFlags::empty())?;
        let binds = env.create_db(Some("binds"), DatabaseFlags::empty())?;

        info!(path = %path.display(), "Opened teller store");

        Ok(Self {
            env,
            deposit_addresses,
            scan_meta,
            deposits,
            binds,
        })
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn deposit_addresses_db(&self, coin: CoinType) -> Database {
        self.deposit_addresses[&coin]
    }

    pub(crate) fn scan_meta_db(&self, coin: CoinType) -> Database {
        self.scan_meta[&coin]
    }

    pub(crate) fn deposits_db(&self) -> Database {
        self.deposits
    }

    pub(crate) fn binds_db(&self) -> Database {
        self.binds
    }

    /// Read a JSON value; `None` when the key is absent.
    pub(crate) fn get_json<T: DeserializeOwned>(
        txn: &impl Transaction,
        db: Database,
        key: &[u8],
    ) -> Result<Option<T>> {
        match txn.get(db, &key) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn put_json<T: Serialize>(
        txn: &mut RwTransaction<'_>,
        db: Database,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        txn.put(db, &key, &bytes, lmdb::WriteFlags::empty())?;
        Ok(())
    }

    pub(crate) fn get_u64(txn: &impl Transaction, db: Database, key: &[u8]) -> Result<u64> {
        match txn.get(db, &key) {
            Ok(bytes) => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| StoreError::Lmdb(lmdb::Error::Corrupted))?;
                Ok(u64::from_le_bytes(arr))
            }
            Err(lmdb::Error::NotFound) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn put_u64(
        txn: &mut RwTransaction<'_>,
        db: Database,
        key: &[u8],
        value: u64,
    ) -> Result<()> {
        txn.put(db, &key, &value.to_le_bytes(), lmdb::WriteFlags::empty())?;
        Ok(())
    }
}
