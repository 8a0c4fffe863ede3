//! Durable state for the teller: one embedded LMDB database with named
//! buckets for address pools, binds, scan state, and deposit records.
//!
//! Every multi-step invariant ("allocate address + create bind",
//! "persist deposits + advance cursor") is enforced inside a single write
//! transaction here; callers never see partial state.

mod addresses;
mod records;
mod scan;
mod store;

pub use addresses::AddressEntry;
pub use store::Store;

use teller_core::types::CoinType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no unused {0} deposit address left in the pool")]
    PoolExhausted(CoinType),

    #[error("MDL address {0} has reached the max number of bound addresses")]
    MaxBoundExceeded(String),

    #[error("deposit record {0} is finalized and cannot be modified")]
    RecordFinalized(String),

    #[error("scanned deposit {0} not found")]
    ScanDepositMissing(String),

    #[error("deposit record {0} not found")]
    RecordMissing(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
