//! Waves node REST client, shared by the WAVES and WAVES-MDL scanners.
//!
//! Plain WAVES matches transfer transactions without an asset id; the
//! WAVES-MDL variant matches only transfers of the configured asset.
//! Amounts are already integers in 1e8 units on the wire.

use crate::base::CoinClient;
use crate::{Result, ScannerError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use teller_core::types::{ChainBlock, ChainOutput, ChainTx};

const TRANSFER_TX_TYPE: u32 = 4;

pub struct WavesClient {
    http: reqwest::Client,
    base_url: String,
    /// `None` scans native WAVES transfers; `Some(id)` scans transfers of
    /// that asset (the Waves-hosted MDL token).
    asset_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WavesHeight {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct WavesBlock {
    signature: String,
    height: u64,
    /// Milliseconds since epoch.
    timestamp: i64,
    #[serde(default)]
    transactions: Vec<WavesTx>,
}

#[derive(Debug, Deserialize)]
struct WavesTx {
    #[serde(rename = "type")]
    tx_type: u32,
    id: String,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(rename = "assetId", default)]
    asset_id: Option<String>,
}

impl WavesClient {
    pub fn new(base_url: &str, asset_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("default reqwest client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            asset_id,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ScannerError::Rpc(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScannerError::NotReady);
        }
        let response = response
            .error_for_status()
            .map_err(|e| ScannerError::Rpc(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| ScannerError::Rpc(e.to_string()))
    }
}

#[async_trait]
impl CoinClient for WavesClient {
    async fn tip_height(&self) -> Result<u64> {
        let height: WavesHeight = self.get_json("/blocks/height").await?;
        Ok(height.height)
    }

    async fn block_at(&self, height: u64) -> Result<ChainBlock> {
        let block: WavesBlock = self.get_json(&format!("/blocks/at/{height}")).await?;
        Ok(waves_block_to_chain(block, self.asset_id.as_deref()))
    }
}

fn waves_block_to_chain(block: WavesBlock, asset_id: Option<&str>) -> ChainBlock {
    let transactions = block
        .transactions
        .into_iter()
        .filter_map(|tx| {
            if tx.tx_type != TRANSFER_TX_TYPE {
                return None;
            }
            if tx.asset_id.as_deref() != asset_id {
                return None;
            }
            let recipient = tx.recipient?;
            let amount = tx.amount?;
            Some(ChainTx {
                tx_id: tx.id,
                outputs: vec![ChainOutput {
                    index: 0,
                    amount: amount as i128,
                    addresses: vec![recipient],
                }],
            })
        })
        .collect();

    ChainBlock {
        height: block.height,
        hash: block.signature,
        timestamp: block.timestamp / 1000,
        transactions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_block() -> serde_json::Value {
        serde_json::json!({
            "signature": "waves-sig",
            "height": 959412,
            "timestamp": 1510000000000i64,
            "transactions": [
                {"type": 4, "id": "tx-native", "recipient": "3PWaves", "amount": 10000000, "assetId": null},
                {"type": 4, "id": "tx-asset", "recipient": "3PAsset", "amount": 20000000, "assetId": "mdl-asset-id"},
                {"type": 2, "id": "tx-payment", "recipient": "3POld", "amount": 5},
                {"type": 4, "id": "tx-burn", "recipient": null, "amount": 7}
            ]
        })
    }

    #[test]
    fn native_scan_ignores_asset_transfers() {
        let block: WavesBlock = serde_json::from_value(raw_block()).unwrap();
        let chain = waves_block_to_chain(block, None);

        assert_eq!(chain.transactions.len(), 1);
        assert_eq!(chain.transactions[0].tx_id, "tx-native");
        assert_eq!(chain.transactions[0].outputs[0].amount, 10_000_000);
        assert_eq!(chain.timestamp, 1_510_000_000);
    }

    #[test]
    fn asset_scan_matches_only_the_configured_asset() {
        let block: WavesBlock = serde_json::from_value(raw_block()).unwrap();
        let chain = waves_block_to_chain(block, Some("mdl-asset-id"));

        assert_eq!(chain.transactions.len(), 1);
        assert_eq!(chain.transactions[0].tx_id, "tx-asset");
    }
}
