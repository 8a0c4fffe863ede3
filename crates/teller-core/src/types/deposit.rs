use crate::types::{BindRecord, CoinType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a deposit: one output of one transaction on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositKey {
    pub coin_type: CoinType,
    pub tx_id: String,
    pub out_index: u32,
}

impl DepositKey {
    /// Key under which the deposit record is stored.
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}", self.coin_type, self.tx_id, self.out_index)
    }
}

impl fmt::Display for DepositKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.coin_type, self.tx_id, self.out_index)
    }
}

/// A matching output detected by a scanner, in the smallest integer unit
/// of the source chain. `amount` is signed so downstream validation can
/// reject negative values coming from a misbehaving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub coin_type: CoinType,
    pub tx_id: String,
    pub out_index: u32,
    pub address: String,
    pub amount: i128,
    pub block_height: u64,
    pub block_hash: String,
    pub timestamp: i64,
}

impl DepositEvent {
    pub fn key(&self) -> DepositKey {
        DepositKey {
            coin_type: self.coin_type,
            tx_id: self.tx_id.clone(),
            out_index: self.out_index,
        }
    }
}

/// Lifecycle of a deposit record. Transitions are strictly monotonic;
/// `Done` is terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    WaitingDeposit,
    WaitingDecide,
    WaitingSend,
    WaitingConfirm,
    WaitingPassthroughOrder,
    Done,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::WaitingDeposit => "waiting_deposit",
            DepositStatus::WaitingDecide => "waiting_decide",
            DepositStatus::WaitingSend => "waiting_send",
            DepositStatus::WaitingConfirm => "waiting_confirm",
            DepositStatus::WaitingPassthroughOrder => "waiting_passthrough_order",
            DepositStatus::Done => "done",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-deposit record driven through the exchange state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRecord {
    /// Monotonic sequence number assigned at creation, used by /api/status.
    pub seq: u64,
    pub coin_type: CoinType,
    pub tx_id: String,
    pub out_index: u32,
    pub status: DepositStatus,
    /// Fatal cause when the record ends in `done` without a payout.
    pub error: Option<String>,
    /// Deposited amount in the source chain's smallest unit.
    pub amount: i128,
    /// Droplets to pay out, computed when the rate is snapshotted.
    pub mdl_droplets: u64,
    /// Droplets actually sent; 0 until the send transaction is submitted.
    pub mdl_sent: u64,
    pub mdl_tx_id: Option<String>,
    /// Exchange rate string snapshotted at decide time.
    pub rate: Option<String>,
    pub bind: BindRecord,
    pub created_at: i64,
    pub updated_at: i64,

    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DepositRecord {
    pub fn key(&self) -> DepositKey {
        DepositKey {
            coin_type: self.coin_type,
            tx_id: self.tx_id.clone(),
            out_index: self.out_index,
        }
    }
}

/// One row of the /api/status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositStatusEntry {
    pub seq: u64,
    pub updated_at: i64,
    pub status: DepositStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuyMethod;

    fn record() -> DepositRecord {
        DepositRecord {
            seq: 7,
            coin_type: CoinType::Btc,
            tx_id: "deadbeef".into(),
            out_index: 2,
            status: DepositStatus::WaitingDecide,
            error: None,
            amount: 200_000,
            mdl_droplets: 0,
            mdl_sent: 0,
            mdl_tx_id: None,
            rate: None,
            bind: BindRecord {
                mdl_address: "2fMjZ4UX9q7kfzpb9dHxaeGYTVdu2aDC1Dw".into(),
                coin_type: CoinType::Btc,
                deposit_address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".into(),
                buy_method: BuyMethod::Direct,
                created_at: 1,
                extra: Default::default(),
            },
            created_at: 1,
            updated_at: 1,
            extra: Default::default(),
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DepositStatus::WaitingPassthroughOrder).unwrap();
        assert_eq!(json, "\"waiting_passthrough_order\"");
    }

    #[test]
    fn unknown_fields_round_trip() {
        let mut value = serde_json::to_value(record()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_field".into(), serde_json::json!({"x": 1}));

        let parsed: DepositRecord = serde_json::from_value(value).unwrap();
        assert!(parsed.extra.contains_key("future_field"));

        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(reserialized["future_field"]["x"], 1);
    }

    #[test]
    fn storage_key_is_coin_scoped() {
        assert_eq!(record().key().storage_key(), "BTC:deadbeef:2");
    }
}
