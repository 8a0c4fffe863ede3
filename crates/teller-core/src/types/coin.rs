use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported source chains for deposits.
///
/// Adding a coin means adding a tag here, a scanner client for it, and the
/// per-coin config sections; everything else dispatches over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoinType {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "SKY")]
    Sky,
    #[serde(rename = "WAVES")]
    Waves,
    /// MDL asset hosted on the Waves chain
    #[serde(rename = "WAVES-MDL")]
    WavesMdl,
}

impl CoinType {
    pub const ALL: [CoinType; 5] = [
        CoinType::Btc,
        CoinType::Eth,
        CoinType::Sky,
        CoinType::Waves,
        CoinType::WavesMdl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoinType::Btc => "BTC",
            CoinType::Eth => "ETH",
            CoinType::Sky => "SKY",
            CoinType::Waves => "WAVES",
            CoinType::WavesMdl => "WAVES-MDL",
        }
    }

    /// Suffix used in store bucket names (`deposit_addresses_<suffix>`).
    pub fn bucket_suffix(&self) -> &'static str {
        match self {
            CoinType::Btc => "btc",
            CoinType::Eth => "eth",
            CoinType::Sky => "sky",
            CoinType::Waves => "waves",
            CoinType::WavesMdl => "waves_mdl",
        }
    }

    /// Smallest-unit scale of the source chain: how many native units
    /// make one whole coin (satoshis, wei, droplets).
    pub fn native_unit_scale(&self) -> i128 {
        match self {
            CoinType::Btc => 100_000_000,
            CoinType::Eth => 1_000_000_000_000_000_000,
            CoinType::Sky => 1_000_000,
            CoinType::Waves | CoinType::WavesMdl => 100_000_000,
        }
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoinType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC" => Ok(CoinType::Btc),
            "ETH" => Ok(CoinType::Eth),
            "SKY" => Ok(CoinType::Sky),
            "WAVES" => Ok(CoinType::Waves),
            "WAVES-MDL" => Ok(CoinType::WavesMdl),
            other => Err(CoreError::UnknownCoinType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for coin in CoinType::ALL {
            assert_eq!(coin.as_str().parse::<CoinType>().unwrap(), coin);
        }
        assert!("DOGE".parse::<CoinType>().is_err());
    }

    #[test]
    fn serializes_as_wire_name() {
        let json = serde_json::to_string(&CoinType::WavesMdl).unwrap();
        assert_eq!(json, "\"WAVES-MDL\"");
    }
}
