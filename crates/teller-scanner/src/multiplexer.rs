use crate::{DepositNote, Result, ScannerError};
use std::collections::HashSet;
use std::sync::Mutex;
use teller_core::types::CoinType;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Fan-in of scanner deposit streams. One drain task per registered
/// scanner forwards into a single bounded outbound stream: FIFO per
/// source, no ordering across coins.
pub struct Multiplexer {
    out_tx: mpsc::Sender<DepositNote>,
    out_rx: Mutex<Option<mpsc::Receiver<DepositNote>>>,
    registered: Mutex<HashSet<CoinType>>,
    drains: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Multiplexer {
    pub fn new() -> Self {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            out_tx,
            out_rx: Mutex::new(Some(out_rx)),
            registered: Mutex::new(HashSet::new()),
            drains: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a scanner's deposit stream. Fails on a duplicate coin.
    pub fn add_scanner(
        &self,
        coin: CoinType,
        mut deposits: mpsc::Receiver<DepositNote>,
    ) -> Result<()> {
        {
            let mut registered = self.registered.lock().unwrap();
            if !registered.insert(coin) {
                return Err(ScannerError::AlreadyRegistered(coin));
            }
        }

        let out_tx = self.out_tx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    note = deposits.recv() => match note {
                        Some(note) => {
                            if out_tx.send(note).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!(coin = %coin, "Multiplexer drain stopped");
        });
        self.drains.lock().unwrap().push(handle);

        info!(coin = %coin, "Registered scanner with multiplexer");
        Ok(())
    }

    /// Take the merged stream. Yields `None` after the first call.
    pub fn deposits(&self) -> Option<mpsc::Receiver<DepositNote>> {
        self.out_rx.lock().unwrap().take()
    }

    /// Stop all drain tasks and close the outbound stream. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let drains = std::mem::take(&mut *self.drains.lock().unwrap());
        for handle in drains {
            let _ = handle.await;
        }
        info!("Multiplexer shut down");
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teller_core::types::DepositEvent;

    fn event(coin: CoinType, tx_id: &str) -> DepositEvent {
        DepositEvent {
            coin_type: coin,
            tx_id: tx_id.to_string(),
            out_index: 0,
            address: "addr".into(),
            amount: 1,
            block_height: 1,
            block_hash: "h".into(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_coin_types() {
        let mux = Multiplexer::new();
        let (_tx1, rx1) = mpsc::channel(1);
        let (_tx2, rx2) = mpsc::channel(1);

        mux.add_scanner(CoinType::Btc, rx1).unwrap();
        assert!(matches!(
            mux.add_scanner(CoinType::Btc, rx2),
            Err(ScannerError::AlreadyRegistered(CoinType::Btc))
        ));
        mux.shutdown().await;
    }

    #[tokio::test]
    async fn merges_streams_preserving_per_source_order() {
        let mux = Multiplexer::new();
        let (btc_tx, btc_rx) = mpsc::channel(4);
        let (eth_tx, eth_rx) = mpsc::channel(4);
        mux.add_scanner(CoinType::Btc, btc_rx).unwrap();
        mux.add_scanner(CoinType::Eth, eth_rx).unwrap();

        let mut merged = mux.deposits().unwrap();
        assert!(mux.deposits().is_none());

        for tx_id in ["b1", "b2"] {
            let (note, _ack) = DepositNote::new(event(CoinType::Btc, tx_id));
            btc_tx.send(note).await.unwrap();
        }
        for tx_id in ["e1", "e2"] {
            let (note, _ack) = DepositNote::new(event(CoinType::Eth, tx_id));
            eth_tx.send(note).await.unwrap();
        }

        let mut btc_seen = Vec::new();
        let mut eth_seen = Vec::new();
        for _ in 0..4 {
            let note = merged.recv().await.unwrap();
            match note.event.coin_type {
                CoinType::Btc => btc_seen.push(note.event.tx_id),
                _ => eth_seen.push(note.event.tx_id),
            }
        }
        assert_eq!(btc_seen, vec!["b1", "b2"]);
        assert_eq!(eth_seen, vec!["e1", "e2"]);

        mux.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_the_outbound_stream() {
        let mux = Multiplexer::new();
        let (_btc_tx, btc_rx) = mpsc::channel::<DepositNote>(1);
        mux.add_scanner(CoinType::Btc, btc_rx).unwrap();

        let mut merged = mux.deposits().unwrap();
        mux.shutdown().await;
        drop(mux);

        assert!(merged.recv().await.is_none());
    }
}
