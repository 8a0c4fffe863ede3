//! Deposit address pools: per-coin address validation and the manager
//! that allocates pool addresses to MDL recipients.

mod codec;
mod manager;

pub use codec::{validate_address, validate_mdl_address};
pub use manager::AddressManager;

use teller_core::types::CoinType;
use teller_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddrsError {
    #[error("invalid {coin} address `{address}`: {reason}")]
    InvalidAddress {
        coin: CoinType,
        address: String,
        reason: String,
    },

    #[error("invalid MDL address `{address}`: {reason}")]
    InvalidMdlAddress { address: String, reason: String },

    #[error("no {0} addresses in pool file")]
    EmptyPool(CoinType),

    #[error("duplicate deposit address `{0}`")]
    DuplicateAddress(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AddrsError>;
