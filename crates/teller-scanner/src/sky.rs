//! Skycoin node REST client.
//!
//! Output amounts arrive as whole-coin decimal strings; they are
//! converted to droplets (1e6) exactly, and outputs whose amount fails
//! to parse are skipped rather than failing the block.

use crate::base::CoinClient;
use crate::{Result, ScannerError};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use teller_core::types::{ChainBlock, ChainOutput, ChainTx};
use tracing::warn;

pub struct SkyClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SkyBlocks {
    blocks: Vec<SkyBlock>,
}

#[derive(Debug, Deserialize)]
struct SkyBlock {
    header: SkyBlockHeader,
    body: SkyBlockBody,
}

#[derive(Debug, Deserialize)]
struct SkyBlockHeader {
    seq: u64,
    block_hash: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct SkyBlockBody {
    txns: Vec<SkyTx>,
}

#[derive(Debug, Deserialize)]
struct SkyTx {
    txid: String,
    #[serde(default)]
    outputs: Vec<SkyOutput>,
}

#[derive(Debug, Deserialize)]
struct SkyOutput {
    dst: String,
    coins: String,
}

impl SkyClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("default reqwest client"),
            base_url: base_url.trim_end_matches('/').to_string(),
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
impl CoinClient for SkyClient {
    async fn tip_height(&self) -> Result<u64> {
        let last: SkyBlocks = self.get_json("/api/v1/last_blocks?num=1").await?;
        let block = last.blocks.first().ok_or(ScannerError::NotReady)?;
        Ok(block.header.seq)
    }

    async fn block_at(&self, height: u64) -> Result<ChainBlock> {
        let block: SkyBlock = self.get_json(&format!("/api/v1/block?seq={height}")).await?;
        Ok(sky_block_to_chain(block))
    }
}

fn sky_block_to_chain(block: SkyBlock) -> ChainBlock {
    let transactions = block
        .body
        .txns
        .into_iter()
        .map(|tx| {
            let txid = tx.txid;
            let outputs = tx
                .outputs
                .iter()
                .enumerate()
                .filter_map(|(index, output)| {
                    let Some(droplets) = coins_to_droplets(&output.coins) else {
                        warn!(txid = %txid, coins = %output.coins, "Skipping unparseable output");
                        return None;
                    };
                    Some(ChainOutput {
                        index: index as u32,
                        amount: droplets,
                        addresses: vec![output.dst.clone()],
                    })
                })
                .collect();
            ChainTx { tx_id: txid, outputs }
        })
        .collect();

    ChainBlock {
        height: block.header.seq,
        hash: block.header.block_hash,
        timestamp: block.header.timestamp,
        transactions,
    }
}

fn coins_to_droplets(coins: &str) -> Option<i128> {
    let coins = Decimal::from_str(coins.trim()).ok()?;
    coins
        .checked_mul(Decimal::from(1_000_000u64))?
        .trunc()
        .to_i128()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_coin_strings_to_droplets() {
        assert_eq!(coins_to_droplets("1"), Some(1_000_000));
        assert_eq!(coins_to_droplets("0.001"), Some(1_000));
        assert_eq!(coins_to_droplets("123.456789"), Some(123_456_789));
        assert_eq!(coins_to_droplets("garbage"), None);
    }

    #[test]
    fn normalizes_block_and_skips_bad_outputs() {
        let raw = serde_json::json!({
            "header": {"seq": 1893, "block_hash": "sky-hash", "timestamp": 1510000000},
            "body": {"txns": [{
                "txid": "sky-tx",
                "outputs": [
                    {"dst": "addr-a", "coins": "2.5"},
                    {"dst": "addr-b", "coins": "not-a-number"}
                ]
            }]}
        });

        let block: SkyBlock = serde_json::from_value(raw).unwrap();
        let chain = sky_block_to_chain(block);

        assert_eq!(chain.height, 1893);
        let outputs = &chain.transactions[0].outputs;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].index, 0);
        assert_eq!(outputs[0].amount, 2_500_000);
        assert_eq!(outputs[0].addresses, vec!["addr-a"]);
    }
}
