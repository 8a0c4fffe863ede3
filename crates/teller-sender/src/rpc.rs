//! MDL node wallet API client. Only the endpoints and fields the teller
//! consumes are modeled.

use crate::{Balance, Result, SendHandle, SenderError, TxConfirmation, TxSender};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use teller_core::rate::droplets_to_string;
use tracing::debug;

pub struct MdlClient {
    http: reqwest::Client,
    base_url: String,
    wallet_id: String,
}

#[derive(Debug, Deserialize)]
struct SpendResponse {
    txn: SpendTxn,
}

#[derive(Debug, Deserialize)]
struct SpendTxn {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    status: TransactionStatus,
}

#[derive(Debug, Deserialize)]
struct TransactionStatus {
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    confirmed: ConfirmedBalance,
}

#[derive(Debug, Deserialize)]
struct ConfirmedBalance {
    coins: u64,
    hours: u64,
}

#[derive(Debug, Deserialize)]
struct PendingTx {
    transaction: PendingTxBody,
}

#[derive(Debug, Deserialize)]
struct PendingTxBody {
    txid: String,
    #[serde(default)]
    outputs: Vec<PendingTxOutput>,
}

#[derive(Debug, Deserialize)]
struct PendingTxOutput {
    dst: String,
    /// Fixed-point MDL string ("1.500000").
    coins: String,
}

impl MdlClient {
    pub fn new(base_url: &str, wallet_id: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("default reqwest client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            wallet_id: wallet_id.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map transport failures to Transient, HTTP-level rejections to Rpc.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T> {
        let response = response.map_err(|e| SenderError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SenderError::Rpc(format!("{status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| SenderError::Transient(e.to_string()))
    }
}

#[async_trait]
impl TxSender for MdlClient {
    async fn send(&self, mdl_address: &str, droplets: u64) -> Result<SendHandle> {
        let response = self
            .http
            .post(self.url("/api/v1/wallet/spend"))
            .form(&[
                ("id", self.wallet_id.as_str()),
                ("dst", mdl_address),
                ("coins", &droplets.to_string()),
            ])
            .send()
            .await;
        let spend: SpendResponse = Self::decode(response).await?;
        debug!(txid = %spend.txn.txid, mdl_address, droplets, "Submitted payout transaction");
        Ok(SendHandle {
            txid: spend.txn.txid,
        })
    }

    async fn is_tx_confirmed(&self, txid: &str) -> Result<TxConfirmation> {
        let response = self
            .http
            .get(self.url("/api/v1/transaction"))
            .query(&[("txid", txid)])
            .send()
            .await;

        // A transaction the node does not know is not an error; it may
        // still be propagating.
        match response {
            Ok(r) if r.status() == reqwest::StatusCode::NOT_FOUND => {
                return Ok(TxConfirmation::Unknown)
            }
            other => {
                let txn: TransactionResponse = Self::decode(other).await?;
                if txn.status.confirmed {
                    Ok(TxConfirmation::Confirmed)
                } else {
                    Ok(TxConfirmation::Pending)
                }
            }
        }
    }

    async fn balance(&self) -> Result<Balance> {
        let response = self
            .http
            .get(self.url("/api/v1/wallet/balance"))
            .query(&[("id", self.wallet_id.as_str())])
            .send()
            .await;
        let balance: BalanceResponse = Self::decode(response).await?;
        Ok(Balance {
            coins: droplets_to_string(balance.confirmed.coins),
            hours: balance.confirmed.hours.to_string(),
        })
    }

    async fn pending_send_to(&self, mdl_address: &str, droplets: u64) -> Result<Option<String>> {
        let response = self.http.get(self.url("/api/v1/pendingTxs")).send().await;
        let pending: Vec<PendingTx> = Self::decode(response).await?;

        let wanted = droplets_to_string(droplets);
        Ok(pending
            .into_iter()
            .find(|tx| {
                tx.transaction
                    .outputs
                    .iter()
                    .any(|out| out.dst == mdl_address && out.coins == wanted)
            })
            .map(|tx| tx.transaction.txid))
    }
}
