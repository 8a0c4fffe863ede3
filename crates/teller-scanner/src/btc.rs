//! btcd JSON-RPC client.
//!
//! Only the fields the scan loop consumes are modeled; amounts come back
//! as BTC decimal strings and are converted to satoshis without touching
//! floats.

use crate::base::CoinClient;
use crate::{Result, ScannerError};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use teller_core::types::{ChainBlock, ChainOutput, ChainTx};

// btcd: "Block number out of range"
const ERR_OUT_OF_RANGE: i64 = -8;

pub struct BtcClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct BtcBlock {
    hash: String,
    height: u64,
    time: i64,
    #[serde(default)]
    tx: Vec<BtcTx>,
}

#[derive(Debug, Deserialize)]
struct BtcTx {
    txid: String,
    #[serde(default)]
    vout: Vec<BtcVout>,
}

#[derive(Debug, Deserialize)]
struct BtcVout {
    n: u32,
    /// BTC amount; kept as a JSON number and re-parsed as a decimal so
    /// 0.1-style values stay exact.
    value: serde_json::Number,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: BtcScript,
}

#[derive(Debug, Deserialize, Default)]
struct BtcScript {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    address: Option<String>,
}

impl BtcClient {
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
            "jsonrpc": "1.0",
            "id": "teller",
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

        let error = &response["error"];
        if !error.is_null() {
            if error["code"].as_i64() == Some(ERR_OUT_OF_RANGE) {
                return Err(ScannerError::NotReady);
            }
            return Err(ScannerError::Rpc(format!("{method}: {error}")));
        }
        Ok(response["result"].take())
    }
}

#[async_trait]
impl CoinClient for BtcClient {
    async fn tip_height(&self) -> Result<u64> {
        self.call("getblockcount", serde_json::json!([]))
            .await?
            .as_u64()
            .ok_or_else(|| ScannerError::Rpc("getblockcount: non-integer result".into()))
    }

    async fn block_at(&self, height: u64) -> Result<ChainBlock> {
        let hash = self
            .call("getblockhash", serde_json::json!([height]))
            .await?;
        let hash = hash
            .as_str()
            .ok_or_else(|| ScannerError::Rpc("getblockhash: non-string result".into()))?;

        // Verbosity 2 includes full transactions with decoded scripts.
        let raw = self.call("getblock", serde_json::json!([hash, 2])).await?;
        let block: BtcBlock =
            serde_json::from_value(raw).map_err(|e| ScannerError::Rpc(e.to_string()))?;
        btc_block_to_chain(block)
    }
}

fn btc_block_to_chain(block: BtcBlock) -> Result<ChainBlock> {
    let transactions = block
        .tx
        .into_iter()
        .map(|tx| ChainTx {
            tx_id: tx.txid,
            outputs: tx
                .vout
                .into_iter()
                .filter_map(|vout| {
                    let addresses = if !vout.script_pub_key.addresses.is_empty() {
                        vout.script_pub_key.addresses
                    } else {
                        vout.script_pub_key.address.into_iter().collect()
                    };
                    if addresses.is_empty() {
                        return None;
                    }
                    let satoshis = btc_to_satoshis(&vout.value)?;
                    Some(ChainOutput {
                        index: vout.n,
                        amount: satoshis,
                        addresses,
                    })
                })
                .collect(),
        })
        .collect();

    Ok(ChainBlock {
        height: block.height,
        hash: block.hash,
        timestamp: block.time,
        transactions,
    })
}

fn btc_to_satoshis(value: &serde_json::Number) -> Option<i128> {
    let btc = Decimal::from_str(&value.to_string()).ok()?;
    btc.checked_mul(Decimal::from(100_000_000u64))?
        .trunc()
        .to_i128()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_block_amounts_and_addresses() {
        let raw = serde_json::json!({
            "hash": "0000000000000000000abc",
            "height": 492478,
            "time": 1510000000,
            "tx": [{
                "txid": "tx-1",
                "vout": [
                    {
                        "n": 0,
                        "value": 0.002,
                        "scriptPubKey": {"addresses": ["1BoatSLRHtKNngkdXEeobR76b53LETtpyT"]}
                    },
                    {
                        "n": 1,
                        "value": 1.23456789,
                        "scriptPubKey": {"address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"}
                    },
                    {
                        "n": 2,
                        "value": 0.5,
                        "scriptPubKey": {}
                    }
                ]
            }]
        });

        let block: BtcBlock = serde_json::from_value(raw).unwrap();
        let chain = btc_block_to_chain(block).unwrap();

        assert_eq!(chain.height, 492478);
        let outputs = &chain.transactions[0].outputs;
        // The script-less output is dropped.
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].amount, 200_000);
        assert_eq!(outputs[1].amount, 123_456_789);
        assert_eq!(
            outputs[1].addresses,
            vec!["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"]
        );
    }

    #[test]
    fn satoshi_conversion_is_exact() {
        let n = serde_json::Number::from_f64(0.1).unwrap();
        assert_eq!(btc_to_satoshis(&n), Some(10_000_000));
    }
}
