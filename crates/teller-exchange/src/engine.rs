use crate::calculate::calculate_mdl_value;
use crate::passthrough::{PassthroughError, PassthroughExchanger};
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use teller_core::types::{
    BuyMethod, CoinType, DepositRecord, DepositStatus, DepositStatusEntry,
};
use teller_scanner::DepositNote;
use teller_sender::{Balance, SenderError, TxSender};
use teller_store::Store;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Configured rate string per coin, read at decide time.
    pub rates: HashMap<CoinType, String>,
    pub max_decimals: u32,
    /// Pause between processor passes and confirmation checks.
    pub tx_confirmation_check_wait: Duration,
    /// When false, records park in waiting_send instead of paying out.
    pub send_enabled: bool,
}

/// Consumes the multiplexed deposit stream and drives every non-final
/// record forward. The store is the ground truth; the in-memory active
/// set only prevents two tasks racing on the same record within one
/// process lifetime.
pub struct ExchangeEngine {
    store: Arc<Store>,
    sender: Arc<dyn TxSender>,
    passthrough: Arc<dyn PassthroughExchanger>,
    cfg: EngineConfig,
    active: Mutex<HashSet<String>>,
    last_send_error: RwLock<Option<String>>,
}

impl ExchangeEngine {
    pub fn new(
        store: Arc<Store>,
        sender: Arc<dyn TxSender>,
        passthrough: Arc<dyn PassthroughExchanger>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            sender,
            passthrough,
            cfg,
            active: Mutex::new(HashSet::new()),
            last_send_error: RwLock::new(None),
        }
    }

    /// Run until shutdown: intake deposits as they arrive, and sweep all
    /// pending records every confirmation-check interval.
    pub async fn run(
        &self,
        mut deposits: mpsc::Receiver<DepositNote>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Exchange engine running");
        let mut tick = tokio::time::interval(self.cfg.tx_confirmation_check_wait);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Exchange engine shutting down");
                    return Ok(());
                }
                note = deposits.recv() => match note {
                    Some(note) => self.save_incoming(note)?,
                    None => {
                        info!("Deposit stream closed, exchange engine stopping");
                        return Ok(());
                    }
                },
                _ = tick.tick() => self.process_pending().await?,
            }
        }
    }

    /// Durable intake of one scanned deposit. Always acks the note:
    /// the deposit either has a record now, or is accounted as
    /// unmatched — it is never silently dropped.
    fn save_incoming(&self, note: DepositNote) -> Result<()> {
        let event = &note.event;
        match self
            .store
            .bind_for_deposit_address(event.coin_type, &event.address)?
        {
            None => {
                // Should not happen: addresses are only published via bind.
                warn!(
                    deposit = %event.key(),
                    address = %event.address,
                    "Deposit to unbound address, dropping"
                );
                metrics::counter!("teller_deposits_unmatched_total").increment(1);
            }
            Some(bind) => {
                let (record, created) = self.store.create_deposit_record(event, &bind)?;
                if created {
                    info!(
                        deposit = %event.key(),
                        seq = record.seq,
                        amount = %event.amount,
                        mdl_address = %bind.mdl_address,
                        "Recorded deposit"
                    );
                } else {
                    debug!(deposit = %event.key(), "Deposit already recorded, ignoring replay");
                }
            }
        }

        let _ = note.ack.send(());
        Ok(())
    }

    /// One pass over every record not yet done. Each record is claimed
    /// in the active set so at most one task processes it at a time.
    async fn process_pending(&self) -> Result<()> {
        for record in self.store.pending_deposit_records()? {
            let key = record.key().storage_key();
            if !self.active.lock().insert(key.clone()) {
                continue;
            }
            let result = self.process_record(record).await;
            self.active.lock().remove(&key);
            result?;
        }
        Ok(())
    }

    async fn process_record(&self, record: DepositRecord) -> Result<()> {
        match record.status {
            DepositStatus::WaitingDeposit | DepositStatus::WaitingDecide => self.decide(record),
            DepositStatus::WaitingPassthroughOrder => self.execute_passthrough(record).await,
            DepositStatus::WaitingSend => self.send_payout(record).await,
            DepositStatus::WaitingConfirm => self.poll_confirmation(record).await,
            DepositStatus::Done => Ok(()),
        }
    }

    /// waiting_decide: snapshot the rate and compute the payout. Fatal
    /// calculation problems finalize the record; no payout is attempted.
    fn decide(&self, record: DepositRecord) -> Result<()> {
        let key = record.key();

        if record.bind.buy_method == BuyMethod::Passthrough {
            self.store.update_deposit_record(&key, |r| {
                r.status = DepositStatus::WaitingPassthroughOrder;
            })?;
            return Ok(());
        }

        let rate = self
            .cfg
            .rates
            .get(&record.coin_type)
            .cloned()
            .unwrap_or_default();

        match calculate_mdl_value(record.amount, record.coin_type, &rate, self.cfg.max_decimals) {
            Ok(0) => {
                warn!(deposit = %key, rate = %rate, "Deposit too small, payout would be zero");
                self.store.update_deposit_record(&key, |r| {
                    r.status = DepositStatus::Done;
                    r.rate = Some(rate.clone());
                    r.error = Some("calculated MDL amount is zero".to_string());
                })?;
            }
            Ok(droplets) => {
                info!(deposit = %key, droplets, rate = %rate, "Rate snapshotted");
                self.store.update_deposit_record(&key, |r| {
                    r.mdl_droplets = droplets;
                    r.rate = Some(rate.clone());
                    r.status = DepositStatus::WaitingSend;
                })?;
            }
            Err(e) => {
                warn!(deposit = %key, rate = %rate, error = %e, "Deposit rejected at decide");
                self.store.update_deposit_record(&key, |r| {
                    r.status = DepositStatus::Done;
                    r.error = Some(e.to_string());
                })?;
            }
        }
        Ok(())
    }

    /// waiting_passthrough_order: fill on the external venue, then fall
    /// through to the normal send path.
    async fn execute_passthrough(&self, record: DepositRecord) -> Result<()> {
        let key = record.key();
        match self.passthrough.execute_order(&record).await {
            Ok(fill) => {
                info!(
                    deposit = %key,
                    droplets = fill.mdl_droplets,
                    rate = %fill.rate,
                    "Passthrough order filled"
                );
                self.store.update_deposit_record(&key, |r| {
                    r.mdl_droplets = fill.mdl_droplets;
                    r.rate = Some(fill.rate.clone());
                    r.status = DepositStatus::WaitingSend;
                })?;
            }
            Err(PassthroughError::Transient(msg)) => {
                debug!(deposit = %key, error = %msg, "Passthrough order pending, will retry");
            }
            Err(PassthroughError::Fatal(msg)) => {
                warn!(deposit = %key, error = %msg, "Passthrough order failed");
                self.store.update_deposit_record(&key, |r| {
                    r.status = DepositStatus::Done;
                    r.error = Some(msg.clone());
                })?;
            }
        }
        Ok(())
    }

    /// waiting_send: submit the payout. The pending-transaction check
    /// first bounds double-sends after a crash between RPC submission
    /// and the durable write. The txid is persisted in the same
    /// transaction as the status transition.
    async fn send_payout(&self, record: DepositRecord) -> Result<()> {
        if !self.cfg.send_enabled {
            debug!("Sending disabled, deposits stay in waiting_send");
            return Ok(());
        }

        let key = record.key();
        let mdl_address = &record.bind.mdl_address;
        let droplets = record.mdl_droplets;

        let txid = match self.sender.pending_send_to(mdl_address, droplets).await {
            Ok(Some(txid)) => {
                warn!(deposit = %key, txid = %txid, "Adopting pending wallet transaction");
                txid
            }
            Ok(None) => match self.sender.send(mdl_address, droplets).await {
                Ok(handle) => handle.txid,
                Err(SenderError::Rpc(msg)) => {
                    error!(deposit = %key, error = %msg, "Wallet rejected payout");
                    *self.last_send_error.write() = Some(msg.clone());
                    self.store.update_deposit_record(&key, |r| {
                        r.status = DepositStatus::Done;
                        r.error = Some(msg.clone());
                    })?;
                    return Ok(());
                }
                Err(e) => {
                    debug!(deposit = %key, error = %e, "Send not completed, will retry");
                    return Ok(());
                }
            },
            Err(e) => {
                debug!(deposit = %key, error = %e, "Pending-transaction check failed, will retry");
                return Ok(());
            }
        };

        self.store.update_deposit_record(&key, |r| {
            r.mdl_tx_id = Some(txid.clone());
            r.mdl_sent = droplets;
            r.status = DepositStatus::WaitingConfirm;
        })?;
        *self.last_send_error.write() = None;
        metrics::counter!("teller_payouts_total").increment(1);
        info!(deposit = %key, txid = %txid, droplets, "Payout submitted");
        Ok(())
    }

    /// waiting_confirm: poll the node; `Pending`/`Unknown` keep the
    /// record for the next pass.
    async fn poll_confirmation(&self, record: DepositRecord) -> Result<()> {
        let key = record.key();
        let Some(txid) = record.mdl_tx_id.clone() else {
            // mdl_sent > 0 implies a txid; a record here without one is
            // corrupt and must not retry forever.
            error!(deposit = %key, "waiting_confirm record has no txid");
            self.store.update_deposit_record(&key, |r| {
                r.status = DepositStatus::Done;
                r.error = Some("missing mdl_tx_id in waiting_confirm".to_string());
            })?;
            return Ok(());
        };

        match self.sender.is_tx_confirmed(&txid).await {
            Ok(teller_sender::TxConfirmation::Confirmed) => {
                self.store
                    .update_deposit_record(&key, |r| r.status = DepositStatus::Done)?;
                info!(deposit = %key, txid = %txid, "Payout confirmed, deposit complete");
            }
            Ok(_) => {
                debug!(deposit = %key, txid = %txid, "Payout not confirmed yet");
            }
            Err(e) => {
                debug!(deposit = %key, txid = %txid, error = %e, "Confirmation check failed, will retry");
            }
        }
        Ok(())
    }

    /// Status rows for /api/status: one per deposit record, plus a
    /// waiting_deposit placeholder for binds that have not received
    /// anything yet.
    pub fn deposit_statuses(&self, mdl_address: &str) -> Result<Vec<DepositStatusEntry>> {
        let records = self.store.deposit_records_for(mdl_address)?;
        let mut entries: Vec<DepositStatusEntry> = records
            .iter()
            .map(|r| DepositStatusEntry {
                seq: r.seq,
                updated_at: r.updated_at,
                status: r.status,
            })
            .collect();

        for bind in self.store.binds_for(mdl_address)? {
            let has_deposit = records.iter().any(|r| {
                r.bind.coin_type == bind.coin_type
                    && r.bind.deposit_address == bind.deposit_address
            });
            if !has_deposit {
                entries.push(DepositStatusEntry {
                    seq: 0,
                    updated_at: bind.created_at,
                    status: DepositStatus::WaitingDeposit,
                });
            }
        }

        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// Last fatal wallet error, cleared by the next successful send.
    pub fn status(&self) -> Option<String> {
        self.last_send_error.read().clone()
    }

    pub async fn balance(&self) -> std::result::Result<Balance, SenderError> {
        self.sender.balance().await
    }
}
