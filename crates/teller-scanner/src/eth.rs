//! geth JSON-RPC client.
//!
//! ETH has no outputs; each transaction with a recipient becomes one
//! pseudo-output (index 0) carrying the transferred wei. Recipient
//! addresses are lowercased so matching against the pool is
//! case-insensitive.

use crate::base::CoinClient;
use crate::{Result, ScannerError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use teller_core::types::{ChainBlock, ChainOutput, ChainTx};

pub struct EthClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct EthBlock {
    hash: String,
    number: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<EthTx>,
}

#[derive(Debug, Deserialize)]
struct EthTx {
    hash: String,
    to: Option<String>,
    value: String,
}

impl EthClient {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("default reqwest client"),
            url: url.to_string(),
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut response: serde_json::Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScannerError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ScannerError::Rpc(e.to_string()))?;

        if !response["error"].is_null() {
            return Err(ScannerError::Rpc(format!(
                "{method}: {}",
                response["error"]
            )));
        }
        Ok(response["result"].take())
    }
}

#[async_trait]
impl CoinClient for EthClient {
    async fn tip_height(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| ScannerError::Rpc("eth_blockNumber: non-string result".into()))?;
        parse_hex_u64(hex).ok_or_else(|| ScannerError::Rpc(format!("bad block number {hex}")))
    }

    async fn block_at(&self, height: u64) -> Result<ChainBlock> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([format!("0x{height:x}"), true]),
            )
            .await?;
        if result.is_null() {
            return Err(ScannerError::NotReady);
        }
        let block: EthBlock =
            serde_json::from_value(result).map_err(|e| ScannerError::Rpc(e.to_string()))?;
        eth_block_to_chain(block)
    }
}

fn eth_block_to_chain(block: EthBlock) -> Result<ChainBlock> {
    let height = parse_hex_u64(&block.number)
        .ok_or_else(|| ScannerError::Rpc(format!("bad block number {}", block.number)))?;
    let timestamp = parse_hex_u64(&block.timestamp).unwrap_or_default() as i64;

    let transactions = block
        .transactions
        .into_iter()
        .filter_map(|tx| {
            let to = tx.to?;
            let wei = parse_hex_u128(&tx.value)?;
            Some(ChainTx {
                tx_id: tx.hash,
                outputs: vec![ChainOutput {
                    index: 0,
                    amount: wei as i128,
                    addresses: vec![to.to_lowercase()],
                }],
            })
        })
        .collect();

    Ok(ChainBlock {
        height,
        hash: block.hash,
        timestamp,
        transactions,
    })
}

fn parse_hex_u64(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex.strip_prefix("0x")?, 16).ok()
}

fn parse_hex_u128(hex: &str) -> Option<u128> {
    u128::from_str_radix(hex.strip_prefix("0x")?, 16).ok()
}
