//! MDL hot-wallet access: the only component that sends coins.
//!
//! [`MdlClient`] talks to the node's wallet API; [`RetrySender`] wraps any
//! [`TxSender`] with transient-failure retries and capped exponential
//! backoff, surfacing node-level rejections immediately.

mod retry;
mod rpc;

pub use retry::RetrySender;
pub use rpc::MdlClient;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SenderError {
    /// Node-level rejection (insufficient balance, malformed request).
    /// Fatal for the deposit being paid out; never retried.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Connection-class failure; retried with backoff.
    #[error("transient send failure: {0}")]
    Transient(String),

    #[error("sender is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SenderError>;

/// Handle for a submitted payout transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendHandle {
    pub txid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxConfirmation {
    Confirmed,
    /// Known to the node, not yet confirmed.
    Pending,
    /// The node does not know the transaction (yet).
    Unknown,
}

/// Hot-wallet balance as reported by the node.
#[derive(Debug, Clone)]
pub struct Balance {
    pub coins: String,
    pub hours: String,
}

/// Wallet-backed coin sending. The exchange engine is the only consumer;
/// no other task may issue sends.
#[async_trait]
pub trait TxSender: Send + Sync {
    /// Submit a payout of `droplets` to `mdl_address`.
    async fn send(&self, mdl_address: &str, droplets: u64) -> Result<SendHandle>;

    async fn is_tx_confirmed(&self, txid: &str) -> Result<TxConfirmation>;

    async fn balance(&self) -> Result<Balance>;

    /// Wallet introspection: an unconfirmed transaction from the hot
    /// wallet paying exactly `droplets` to `mdl_address`, if one exists.
    /// The exchange consults this before submitting, which bounds
    /// double-sends after a crash between RPC submission and the durable
    /// record write.
    async fn pending_send_to(&self, mdl_address: &str, droplets: u64) -> Result<Option<String>>;
}
