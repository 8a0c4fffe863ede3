//! Per-coin block scanners and the multiplexer that merges their deposit
//! streams for the exchange.
//!
//! One shared loop walks each chain from a persisted cursor, gated by the
//! coin's confirmation depth; coin specifics live entirely in the
//! [`CoinClient`] implementations that fetch and normalize blocks.

mod base;
mod btc;
mod eth;
mod multiplexer;
mod sky;
mod waves;

pub use base::{BaseScanner, CoinClient, CoinScanner, ScanConfig};
pub use btc::BtcClient;
pub use eth::EthClient;
pub use multiplexer::Multiplexer;
pub use sky::SkyClient;
pub use waves::WavesClient;

use teller_core::types::DepositEvent;
use teller_store::StoreError;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Block not available yet (node catching up, empty page, out of
    /// range). The only tolerated RPC class: wait a scan period and retry.
    #[error("block not available yet")]
    NotReady,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scanner is shutting down")]
    ShuttingDown,

    #[error("scanner run() may only be called once")]
    AlreadyStarted,

    #[error("coin type {0} already registered")]
    AlreadyRegistered(teller_core::types::CoinType),
}

pub type Result<T> = std::result::Result<T, ScannerError>;

/// A deposit event travelling to the exchange, carrying the ack the
/// scanner blocks on before marking the deposit processed.
#[derive(Debug)]
pub struct DepositNote {
    pub event: DepositEvent,
    pub ack: oneshot::Sender<()>,
}

impl DepositNote {
    pub fn new(event: DepositEvent) -> (Self, oneshot::Receiver<()>) {
        let (ack, ack_rx) = oneshot::channel();
        (Self { event, ack }, ack_rx)
    }
}
