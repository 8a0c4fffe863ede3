use crate::{DepositNote, Result, ScannerError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teller_core::types::{ChainBlock, CoinType, DepositEvent};
use teller_store::Store;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// The two chain callbacks the shared scan loop needs. Implementations
/// fetch from the coin's node and normalize amounts/addresses into the
/// chain-agnostic block shape; they hold no mutable state.
#[async_trait]
pub trait CoinClient: Send + Sync {
    async fn tip_height(&self) -> Result<u64>;
    async fn block_at(&self, height: u64) -> Result<ChainBlock>;
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub scan_period: Duration,
    pub initial_scan_height: u64,
    pub confirmations_required: u64,
}

// Scanner lifecycle: starting -> running -> shutdown-requested -> stopped
const STATE_STARTING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Shared scan loop: walk the chain from the persisted cursor, gate on
/// confirmation depth, join blocks against the scan-address set in the
/// store, and emit matches with backpressure. Coin specifics come in
/// through the [`CoinClient`].
pub struct BaseScanner {
    store: Arc<Store>,
    coin: CoinType,
    cfg: ScanConfig,
    deposit_tx: mpsc::Sender<DepositNote>,
    deposit_rx: Mutex<Option<mpsc::Receiver<DepositNote>>>,
    shutdown_tx: watch::Sender<bool>,
    state: AtomicU8,
}

impl BaseScanner {
    pub fn new(store: Arc<Store>, coin: CoinType, cfg: ScanConfig) -> Self {
        let (deposit_tx, deposit_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            coin,
            cfg,
            deposit_tx,
            deposit_rx: Mutex::new(Some(deposit_rx)),
            shutdown_tx,
            state: AtomicU8::new(STATE_STARTING),
        }
    }

    pub fn coin_type(&self) -> CoinType {
        self.coin
    }

    /// Take the deposit stream. Yields `None` after the first call.
    pub fn deposits(&self) -> Option<mpsc::Receiver<DepositNote>> {
        self.deposit_rx.lock().unwrap().take()
    }

    /// Request shutdown. Idempotent; safe from any task.
    pub fn shutdown(&self) {
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_SHUTDOWN,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.shutdown_tx.send(true);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run the scan loop until shutdown or a fatal error. May only be
    /// called once per instance.
    pub async fn run(&self, client: &dyn CoinClient) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_STARTING,
                STATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(ScannerError::AlreadyStarted);
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        let result = self.scan_loop(client, &mut shutdown).await;
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!(coin = %self.coin, "Scanner stopped");

        match result {
            Err(ScannerError::ShuttingDown) => Ok(()),
            other => other,
        }
    }

    async fn scan_loop(
        &self,
        client: &dyn CoinClient,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        // Deposits persisted before a crash but never acked by the
        // exchange go out first; record creation downstream is idempotent.
        let unprocessed = self.store.unprocessed_deposits(self.coin)?;
        if !unprocessed.is_empty() {
            warn!(
                coin = %self.coin,
                count = unprocessed.len(),
                "Re-emitting unprocessed deposits from previous run"
            );
            for event in unprocessed {
                self.emit(event, shutdown).await?;
            }
        }

        let mut height = self
            .store
            .scan_cursor(self.coin)?
            .max(self.cfg.initial_scan_height);

        info!(
            coin = %self.coin,
            height,
            confirmations = self.cfg.confirmations_required,
            "Scanner running"
        );

        loop {
            if self.is_shutdown() {
                return Err(ScannerError::ShuttingDown);
            }

            let tip = client.tip_height().await.map_err(|e| {
                error!(coin = %self.coin, error = %e, "Failed to fetch chain tip");
                e
            })?;

            if height + self.cfg.confirmations_required > tip {
                debug!(coin = %self.coin, height, tip, "Waiting for confirmations");
                self.wait(shutdown).await?;
                continue;
            }

            let block = match client.block_at(height).await {
                Ok(block) => block,
                Err(ScannerError::NotReady) => {
                    debug!(coin = %self.coin, height, "Block not ready");
                    self.wait(shutdown).await?;
                    continue;
                }
                Err(e) => {
                    error!(coin = %self.coin, height, error = %e, "Fatal scanner RPC error");
                    return Err(e);
                }
            };

            let deposits = self.store.scan_block(self.coin, &block)?;
            if !deposits.is_empty() {
                info!(
                    coin = %self.coin,
                    height,
                    hash = %block.hash,
                    deposits = deposits.len(),
                    "Found deposits in block"
                );
            }
            for event in deposits {
                self.emit(event, shutdown).await?;
            }

            height += 1;
        }
    }

    /// Sleep one scan period, waking early on shutdown.
    async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.cfg.scan_period) => Ok(()),
            _ = shutdown.changed() => Err(ScannerError::ShuttingDown),
        }
    }

    /// Emit one deposit and block until the consumer acknowledges it;
    /// only then is the deposit flagged processed. Backpressure by
    /// design: an undrained stream halts scanning.
    async fn emit(
        &self,
        event: DepositEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let key = event.key();
        let coin = self.coin.as_str();
        let (note, ack_rx) = DepositNote::new(event);

        // Biased so a delivered note / received ack is always honored
        // even when shutdown fires in the same instant.
        tokio::select! {
            biased;
            sent = self.deposit_tx.send(note) => {
                if sent.is_err() {
                    return Err(ScannerError::ShuttingDown);
                }
            }
            _ = shutdown.changed() => return Err(ScannerError::ShuttingDown),
        }

        tokio::select! {
            biased;
            acked = ack_rx => {
                if acked.is_err() {
                    return Err(ScannerError::ShuttingDown);
                }
            }
            _ = shutdown.changed() => return Err(ScannerError::ShuttingDown),
        }

        self.store.set_deposit_processed(&key)?;
        metrics::counter!("teller_deposits_scanned_total", "coin" => coin).increment(1);
        debug!(coin = %self.coin, deposit = %key, "Deposit acknowledged");
        Ok(())
    }
}

/// A scanner for one coin: the shared base plus that coin's RPC client.
pub struct CoinScanner {
    base: BaseScanner,
    client: Arc<dyn CoinClient>,
}

impl CoinScanner {
    pub fn new(
        store: Arc<Store>,
        coin: CoinType,
        client: Arc<dyn CoinClient>,
        cfg: ScanConfig,
    ) -> Self {
        Self {
            base: BaseScanner::new(store, coin, cfg),
            client,
        }
    }

    pub fn coin_type(&self) -> CoinType {
        self.base.coin_type()
    }

    pub async fn run(&self) -> Result<()> {
        self.base.run(self.client.as_ref()).await
    }

    pub fn shutdown(&self) {
        self.base.shutdown();
    }

    pub fn deposits(&self) -> Option<mpsc::Receiver<DepositNote>> {
        self.base.deposits()
    }

    pub fn add_scan_address(&self, address: &str) -> Result<()> {
        Ok(self.base.store.add_scan_address(self.base.coin, address)?)
    }

    pub fn get_scan_addresses(&self) -> Result<Vec<String>> {
        Ok(self.base.store.scan_addresses(self.base.coin)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use teller_core::types::{ChainOutput, ChainTx};
    use tempfile::tempdir;

    struct MockClient {
        tip: AtomicU64,
        blocks: Mutex<HashMap<u64, ChainBlock>>,
    }

    impl MockClient {
        fn new(tip: u64, blocks: Vec<ChainBlock>) -> Self {
            Self {
                tip: AtomicU64::new(tip),
                blocks: Mutex::new(blocks.into_iter().map(|b| (b.height, b)).collect()),
            }
        }
    }

    #[async_trait]
    impl CoinClient for MockClient {
        async fn tip_height(&self) -> Result<u64> {
            Ok(self.tip.load(Ordering::SeqCst))
        }

        async fn block_at(&self, height: u64) -> Result<ChainBlock> {
            self.blocks
                .lock()
                .unwrap()
                .get(&height)
                .cloned()
                .ok_or(ScannerError::NotReady)
        }
    }

    struct FailingClient;

    #[async_trait]
    impl CoinClient for FailingClient {
        async fn tip_height(&self) -> Result<u64> {
            Err(ScannerError::Rpc("connection refused".into()))
        }

        async fn block_at(&self, _height: u64) -> Result<ChainBlock> {
            Err(ScannerError::Rpc("connection refused".into()))
        }
    }

    fn block(height: u64, tx_id: &str, address: &str, amount: i128) -> ChainBlock {
        ChainBlock {
            height,
            hash: format!("hash-{height}"),
            timestamp: 1_700_000_000,
            transactions: vec![ChainTx {
                tx_id: tx_id.to_string(),
                outputs: vec![ChainOutput {
                    index: 0,
                    amount,
                    addresses: vec![address.to_string()],
                }],
            }],
        }
    }

    fn cfg() -> ScanConfig {
        ScanConfig {
            scan_period: Duration::from_millis(10),
            initial_scan_height: 0,
            confirmations_required: 1,
        }
    }

    fn store(dir: &std::path::Path) -> Arc<Store> {
        Arc::new(Store::open(&dir.join("teller.db")).unwrap())
    }

    #[tokio::test]
    async fn emits_matches_in_block_order_and_marks_processed() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.add_scan_address(CoinType::Btc, "watch-1").unwrap();

        let client = MockClient::new(
            2,
            vec![
                block(0, "tx-a", "watch-1", 100),
                block(1, "tx-b", "watch-1", 200),
                block(2, "tx-c", "watch-1", 300),
            ],
        );
        let scanner = Arc::new(CoinScanner::new(
            store.clone(),
            CoinType::Btc,
            Arc::new(client),
            cfg(),
        ));
        let mut deposits = scanner.deposits().unwrap();

        let runner = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run().await })
        };

        // tip=2, confirmations=1 -> heights 0 and 1 are processable.
        for expected in ["tx-a", "tx-b"] {
            let note = deposits.recv().await.unwrap();
            assert_eq!(note.event.tx_id, expected);
            note.ack.send(()).unwrap();
        }

        scanner.shutdown();
        runner.await.unwrap().unwrap();

        assert!(store.unprocessed_deposits(CoinType::Btc).unwrap().is_empty());
        assert_eq!(store.scan_cursor(CoinType::Btc).unwrap(), 2);
    }

    #[tokio::test]
    async fn confirmation_gate_holds_back_the_tip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.add_scan_address(CoinType::Btc, "watch-1").unwrap();

        // tip == height, one confirmation required: nothing processable.
        let client = MockClient::new(0, vec![block(0, "tx-a", "watch-1", 100)]);
        let scanner = Arc::new(CoinScanner::new(
            store.clone(),
            CoinType::Btc,
            Arc::new(client),
            cfg(),
        ));
        let mut deposits = scanner.deposits().unwrap();

        let runner = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run().await })
        };

        let nothing =
            tokio::time::timeout(Duration::from_millis(50), deposits.recv()).await;
        assert!(nothing.is_err(), "no deposit may be emitted below the gate");

        scanner.shutdown();
        runner.await.unwrap().unwrap();
        assert_eq!(store.scan_cursor(CoinType::Btc).unwrap(), 0);
    }

    #[tokio::test]
    async fn replays_unprocessed_deposits_on_startup() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.add_scan_address(CoinType::Sky, "watch-1").unwrap();

        // Simulate a previous run that persisted a deposit (cursor
        // advanced) but crashed before the consumer acknowledged it.
        store
            .scan_block(CoinType::Sky, &block(7, "tx-old", "watch-1", 42))
            .unwrap();

        let client = MockClient::new(0, vec![]);
        let scanner = Arc::new(CoinScanner::new(
            store.clone(),
            CoinType::Sky,
            Arc::new(client),
            cfg(),
        ));
        let mut deposits = scanner.deposits().unwrap();

        let runner = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run().await })
        };

        let note = deposits.recv().await.unwrap();
        assert_eq!(note.event.tx_id, "tx-old");
        note.ack.send(()).unwrap();

        scanner.shutdown();
        runner.await.unwrap().unwrap();
        assert!(store.unprocessed_deposits(CoinType::Sky).unwrap().is_empty());
    }

    #[tokio::test]
    async fn fatal_rpc_error_stops_the_scanner() {
        let dir = tempdir().unwrap();
        let scanner = CoinScanner::new(
            store(dir.path()),
            CoinType::Eth,
            Arc::new(FailingClient),
            cfg(),
        );
        let _deposits = scanner.deposits().unwrap();

        let err = scanner.run().await.unwrap_err();
        assert!(matches!(err, ScannerError::Rpc(_)));
    }

    #[tokio::test]
    async fn run_is_single_shot() {
        let dir = tempdir().unwrap();
        let scanner = Arc::new(CoinScanner::new(
            store(dir.path()),
            CoinType::Btc,
            Arc::new(MockClient::new(0, vec![])),
            cfg(),
        ));
        let _deposits = scanner.deposits().unwrap();

        let runner = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run().await })
        };
        // Give the first run a moment to claim the state.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            scanner.run().await,
            Err(ScannerError::AlreadyStarted)
        ));

        scanner.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_pending_emit() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.add_scan_address(CoinType::Btc, "watch-1").unwrap();

        let client = MockClient::new(5, vec![block(0, "tx-a", "watch-1", 100)]);
        let scanner = Arc::new(CoinScanner::new(
            store,
            CoinType::Btc,
            Arc::new(client),
            cfg(),
        ));
        // Nobody drains the stream: the scanner must still shut down in
        // bounded time.
        let _deposits = scanner.deposits().unwrap();

        let runner = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        scanner.shutdown();

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("scanner must stop in bounded time")
            .unwrap()
            .unwrap();
    }
}
