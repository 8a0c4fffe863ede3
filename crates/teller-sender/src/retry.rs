use crate::{Balance, Result, SendHandle, SenderError, TxConfirmation, TxSender};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Wraps a [`TxSender`] with retry semantics: transient failures back off
/// exponentially (doubling, capped at `max_delay`) until they succeed or
/// shutdown is signalled; node-level `Rpc` rejections pass straight
/// through so the exchange can finalize the deposit as failed.
pub struct RetrySender<S> {
    inner: S,
    base_delay: Duration,
    max_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: TxSender> RetrySender<S> {
    pub fn new(
        inner: S,
        base_delay: Duration,
        max_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner,
            base_delay,
            max_delay,
            shutdown,
        }
    }

    async fn retry<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                return Err(SenderError::ShuttingDown);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(SenderError::Transient(msg)) => {
                    warn!(
                        op = op_name,
                        error = %msg,
                        delay_ms = delay.as_millis() as u64,
                        "Transient wallet RPC failure, backing off"
                    );
                    metrics::counter!("teller_send_retries_total", "op" => op_name).increment(1);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return Err(SenderError::ShuttingDown),
                    }
                    delay = (delay * 2).min(self.max_delay);
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[async_trait]
impl<S: TxSender> TxSender for RetrySender<S> {
    async fn send(&self, mdl_address: &str, droplets: u64) -> Result<SendHandle> {
        self.retry("send", || self.inner.send(mdl_address, droplets))
            .await
    }

    async fn is_tx_confirmed(&self, txid: &str) -> Result<TxConfirmation> {
        self.retry("is_tx_confirmed", || self.inner.is_tx_confirmed(txid))
            .await
    }

    async fn balance(&self) -> Result<Balance> {
        self.retry("balance", || self.inner.balance()).await
    }

    async fn pending_send_to(&self, mdl_address: &str, droplets: u64) -> Result<Option<String>> {
        self.retry("pending_send_to", || {
            self.inner.pending_send_to(mdl_address, droplets)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedSender {
        sends: Mutex<VecDeque<Result<SendHandle>>>,
        confirms: Mutex<VecDeque<Result<TxConfirmation>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(
            sends: Vec<Result<SendHandle>>,
            confirms: Vec<Result<TxConfirmation>>,
        ) -> Self {
            Self {
                sends: Mutex::new(sends.into()),
                confirms: Mutex::new(confirms.into()),
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TxSender for ScriptedSender {
        async fn send(&self, _mdl_address: &str, _droplets: u64) -> Result<SendHandle> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.sends
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SenderError::Transient("exhausted".into())))
        }

        async fn is_tx_confirmed(&self, _txid: &str) -> Result<TxConfirmation> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.confirms
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TxConfirmation::Pending))
        }

        async fn balance(&self) -> Result<Balance> {
            Ok(Balance {
                coins: "0.000000".into(),
                hours: "0".into(),
            })
        }

        async fn pending_send_to(
            &self,
            _mdl_address: &str,
            _droplets: u64,
        ) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn retry_sender(inner: ScriptedSender) -> (RetrySender<ScriptedSender>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            RetrySender::new(
                inner,
                Duration::from_millis(1),
                Duration::from_millis(4),
                rx,
            ),
            tx,
        )
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let inner = ScriptedSender::new(
            vec![
                Err(SenderError::Transient("timeout".into())),
                Err(SenderError::Transient("connection reset".into())),
                Ok(SendHandle { txid: "tx-1".into() }),
            ],
            vec![],
        );
        let (sender, _shutdown) = retry_sender(inner);

        let handle = sender.send("mdl-a", 1_000_000).await.unwrap();
        assert_eq!(handle.txid, "tx-1");
        assert_eq!(sender.inner.attempts(), 3);
    }

    #[tokio::test]
    async fn rpc_rejections_are_not_retried() {
        let inner = ScriptedSender::new(
            vec![Err(SenderError::Rpc("insufficient balance".into()))],
            vec![],
        );
        let (sender, _shutdown) = retry_sender(inner);

        let err = sender.send("mdl-a", 1).await.unwrap_err();
        assert!(matches!(err, SenderError::Rpc(_)));
        assert_eq!(sender.inner.attempts(), 1);
    }

    #[tokio::test]
    async fn confirmation_polls_through_transients() {
        let inner = ScriptedSender::new(
            vec![],
            vec![
                Err(SenderError::Transient("timeout".into())),
                Ok(TxConfirmation::Pending),
            ],
        );
        let (sender, _shutdown) = retry_sender(inner);

        let status = sender.is_tx_confirmed("tx-1").await.unwrap();
        assert_eq!(status, TxConfirmation::Pending);
        assert_eq!(sender.inner.attempts(), 2);
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_backoff() {
        let inner = ScriptedSender::new(vec![], vec![]);
        let (sender, shutdown) = retry_sender(inner);

        let send = sender.send("mdl-a", 1);
        tokio::pin!(send);

        // Let it hit at least one transient failure, then shut down.
        tokio::select! {
            _ = &mut send => panic!("send must still be retrying"),
            _ = tokio::time::sleep(Duration::from_millis(2)) => {}
        }
        shutdown.send(true).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), send)
            .await
            .expect("retry loop must stop on shutdown")
            .unwrap_err();
        assert!(matches!(err, SenderError::ShuttingDown));
    }
}
