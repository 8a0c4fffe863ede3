//! The exchange engine: turns scanned deposits into durable records and
//! drives each record through decide -> send -> confirm with at-most-once
//! payout semantics.

mod calculate;
mod engine;
mod passthrough;

pub use calculate::calculate_mdl_value;
pub use engine::{EngineConfig, ExchangeEngine};
pub use passthrough::{DirectPassthrough, PassthroughError, PassthroughExchanger, PassthroughFill};

use teller_store::StoreError;
use thiserror::Error;

/// Errors that abort the engine. Per-deposit failures never surface
/// here; they finalize the deposit record instead.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
