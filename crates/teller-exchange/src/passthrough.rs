//! Passthrough buying: fill the recipient's order on an external venue
//! before sending from the hot wallet.
//!
//! The counterparty protocol is pluggable; the engine only needs an
//! order that eventually yields a droplet amount and the rate it filled
//! at, with transient/fatal failures distinguished the same way the
//! sender distinguishes them.

use crate::calculate::calculate_mdl_value;
use async_trait::async_trait;
use std::collections::HashMap;
use teller_core::types::{CoinType, DepositRecord};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PassthroughError {
    /// Venue unreachable or order still filling; retried on a later pass.
    #[error("passthrough order not filled: {0}")]
    Transient(String),

    /// Order rejected; the deposit record is finalized with this cause.
    #[error("passthrough order failed: {0}")]
    Fatal(String),
}

/// A filled passthrough order.
#[derive(Debug, Clone)]
pub struct PassthroughFill {
    pub mdl_droplets: u64,
    /// Effective rate, snapshotted into the deposit record.
    pub rate: String,
}

#[async_trait]
pub trait PassthroughExchanger: Send + Sync {
    /// Place and await the order for this deposit. Must be idempotent
    /// per deposit key: the engine may call again after a crash.
    async fn execute_order(&self, record: &DepositRecord)
        -> Result<PassthroughFill, PassthroughError>;
}

/// Default exchanger: fills instantly at the configured rate, i.e. the
/// economics of a direct buy expressed through the passthrough states.
pub struct DirectPassthrough {
    rates: HashMap<CoinType, String>,
    max_decimals: u32,
}

impl DirectPassthrough {
    pub fn new(rates: HashMap<CoinType, String>, max_decimals: u32) -> Self {
        Self { rates, max_decimals }
    }
}

#[async_trait]
impl PassthroughExchanger for DirectPassthrough {
    async fn execute_order(
        &self,
        record: &DepositRecord,
    ) -> Result<PassthroughFill, PassthroughError> {
        let rate = self
            .rates
            .get(&record.coin_type)
            .cloned()
            .ok_or_else(|| PassthroughError::Fatal(format!("no rate for {}", record.coin_type)))?;

        let mdl_droplets =
            calculate_mdl_value(record.amount, record.coin_type, &rate, self.max_decimals)
                .map_err(|e| PassthroughError::Fatal(e.to_string()))?;

        Ok(PassthroughFill { mdl_droplets, rate })
    }
}
