mod bind;
mod chain;
mod coin;
mod deposit;

pub use bind::{BindRecord, BuyMethod};
pub use chain::{ChainBlock, ChainOutput, ChainTx};
pub use coin::CoinType;
pub use deposit::{DepositEvent, DepositKey, DepositRecord, DepositStatus, DepositStatusEntry};

/// Current timestamp in seconds since Unix epoch
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
