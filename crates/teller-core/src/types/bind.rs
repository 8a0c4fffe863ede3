use crate::error::CoreError;
use crate::types::CoinType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a deposit is converted into MDL before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuyMethod {
    /// Pay out directly from the local hot wallet
    #[default]
    Direct,
    /// Buy the coins from an external exchange first, then send
    Passthrough,
}

impl BuyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyMethod::Direct => "direct",
            BuyMethod::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for BuyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuyMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(BuyMethod::Direct),
            "passthrough" => Ok(BuyMethod::Passthrough),
            other => Err(CoreError::InvalidBuyMethod(other.to_string())),
        }
    }
}

/// Durable association of an MDL recipient with one allocated deposit
/// address. Created once by the teller; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRecord {
    pub mdl_address: String,
    pub coin_type: CoinType,
    pub deposit_address: String,
    pub buy_method: BuyMethod,
    pub created_at: i64,

    /// Unknown fields from older/newer versions round-trip through here.
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
