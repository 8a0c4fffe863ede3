use serde::{Deserialize, Serialize};

/// Chain-agnostic view of a block, produced by per-coin client
/// normalization and joined against the scan-address set by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainBlock {
    pub height: u64,
    pub hash: String,
    pub timestamp: i64,
    pub transactions: Vec<ChainTx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTx {
    pub tx_id: String,
    pub outputs: Vec<ChainOutput>,
}

/// One spendable output. ETH blocks synthesize one pseudo-output per
/// transaction with a recipient; UTXO chains may list several addresses
/// per output (multisig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutput {
    pub index: u32,
    pub amount: i128,
    pub addresses: Vec<String>,
}
