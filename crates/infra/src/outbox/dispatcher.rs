//! Outbox dispatcher: polls unsent rows and hands them to subscribers.
//!
//! ```text
//! begin ─▶ lock unsent (skip locked) ─▶ decode ─▶ subscribers ─▶ mark sent ─▶ commit
//! ```
//!
//! A row is marked sent only when every subscriber accepted it. Anything else
//! (decode failure, subscriber error) leaves it unsent and it is retried on a
//! later poll, indefinitely. Rows are independent: one failing row does not
//! hold back the rest of the batch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tallyline_events::{Event, EventCodec, EventEnvelope, EventSubscriber};

use super::{DomainEvent, OutboxRecord, OutboxStore};
use crate::error::StoreError;
use crate::transaction::TransactionManager;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct OutboxDispatcherConfig {
    /// Pause between polls when the previous batch was not full.
    pub poll_interval: Duration,
    /// Maximum rows claimed per batch.
    pub batch_size: usize,
    /// Name for logging.
    pub name: String,
}

impl Default for OutboxDispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            name: "outbox-dispatcher".to_string(),
        }
    }
}

impl OutboxDispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Running totals of a spawned dispatcher.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStats {
    pub batches: u64,
    pub delivered: u64,
    pub failed: u64,
    pub batch_errors: u64,
}

pub struct OutboxDispatcher<M: TransactionManager> {
    transactions: Arc<M>,
    outbox: Arc<dyn OutboxStore<M::Tx>>,
    subscribers: Vec<Arc<dyn EventSubscriber<DomainEvent>>>,
}

impl<M: TransactionManager> OutboxDispatcher<M> {
    pub fn new(transactions: Arc<M>, outbox: Arc<dyn OutboxStore<M::Tx>>) -> Self {
        Self {
            transactions,
            outbox,
            subscribers: Vec::new(),
        }
    }

    /// Register a subscriber. Subscribers are called in registration order.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn EventSubscriber<DomainEvent>>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Claim up to `batch_size` unsent rows and deliver them.
    pub async fn dispatch(&self, batch_size: usize) -> Result<DispatchReport, StoreError> {
        let tx = self.transactions.begin().await?;

        let rows = match self.outbox.lock_unsent(&tx, batch_size).await {
            Ok(rows) => rows,
            Err(e) => {
                self.abandon(tx).await;
                return Err(e);
            }
        };

        let mut report = DispatchReport {
            claimed: rows.len(),
            ..DispatchReport::default()
        };

        for row in &rows {
            if !self.deliver(row).await {
                report.failed += 1;
                continue;
            }
            if let Err(e) = self.outbox.mark_sent(&tx, row.id, Utc::now()).await {
                self.abandon(tx).await;
                return Err(e);
            }
            report.delivered += 1;
        }

        self.transactions.commit(tx).await?;
        Ok(report)
    }

    /// Roll back a batch that failed midway. The batch error wins over a
    /// rollback error, which is only logged.
    async fn abandon(&self, tx: M::Tx) {
        if let Err(e) = self.transactions.rollback(tx).await {
            warn!(error = %e, "outbox batch rollback failed");
        }
    }

    /// True when every subscriber accepted the row.
    async fn deliver(&self, row: &OutboxRecord) -> bool {
        let event = match DomainEvent::decode(&row.event_type, &row.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    outbox_id = %row.id,
                    event_type = %row.event_type,
                    error = %e,
                    "outbox row could not be decoded; left unsent"
                );
                return false;
            }
        };

        let envelope = EventEnvelope::new(
            row.id,
            row.tenant_id,
            row.event_type.clone(),
            event.version(),
            row.created_at,
            event,
        );

        let mut ok = true;
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.handle(&envelope).await {
                warn!(
                    outbox_id = %row.id,
                    event_type = %row.event_type,
                    subscriber = subscriber.name(),
                    error = %e,
                    "subscriber failed; row will be retried"
                );
                ok = false;
            }
        }
        ok
    }
}

/// Handle to a spawned dispatcher.
#[derive(Debug)]
pub struct OutboxDispatcherHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl OutboxDispatcherHandle {
    /// Stop polling and wait for the in-flight batch to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "outbox dispatcher task ended abnormally");
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl<M> OutboxDispatcher<M>
where
    M: TransactionManager + 'static,
{
    /// Run the poll loop on the current tokio runtime.
    pub fn spawn(self, config: OutboxDispatcherConfig) -> OutboxDispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));
        let join = tokio::spawn(dispatch_loop(self, config, shutdown_rx, stats.clone()));

        OutboxDispatcherHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

async fn dispatch_loop<M>(
    dispatcher: OutboxDispatcher<M>,
    config: OutboxDispatcherConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<DispatcherStats>>,
) where
    M: TransactionManager + 'static,
{
    info!(
        dispatcher = %config.name,
        batch_size = config.batch_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        subscribers = dispatcher.subscriber_count(),
        "outbox dispatcher started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let full_batch = match dispatcher.dispatch(config.batch_size).await {
            Ok(report) => {
                if let Ok(mut s) = stats.lock() {
                    s.batches += 1;
                    s.delivered += report.delivered as u64;
                    s.failed += report.failed as u64;
                }
                if report.claimed > 0 {
                    debug!(
                        dispatcher = %config.name,
                        claimed = report.claimed,
                        delivered = report.delivered,
                        failed = report.failed,
                        "outbox batch dispatched"
                    );
                }
                report.claimed >= config.batch_size && report.failed == 0
            }
            Err(e) => {
                if let Ok(mut s) = stats.lock() {
                    s.batch_errors += 1;
                }
                error!(dispatcher = %config.name, error = %e, "outbox batch failed");
                false
            }
        };

        // A full, clean batch means there is probably more waiting.
        if full_batch {
            continue;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }

    info!(dispatcher = %config.name, "outbox dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tallyline_core::{BranchId, LedgerEntryId, StockItemId, TenantId};
    use tallyline_events::SubscriberError;
    use tallyline_inventory::{InventoryEvent, StockMovedV1};

    use crate::memory::{InMemoryLedger, MemoryTx};
    use crate::outbox::publish_via_outbox;
    use crate::transaction::with_transaction;

    struct Counting {
        seen: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl EventSubscriber<DomainEvent> for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _env: &EventEnvelope<DomainEvent>) -> Result<(), SubscriberError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(SubscriberError::new("counting", "not yet"));
            }
            Ok(())
        }
    }

    fn received(tenant: TenantId) -> InventoryEvent {
        InventoryEvent::StockReceived(StockMovedV1 {
            tenant_id: tenant,
            branch_id: BranchId::new(),
            entry_id: LedgerEntryId::new(),
            stock_item_id: StockItemId::new(),
            delta: Decimal::ONE,
            note: None,
            actor_id: None,
            occurred_at: Utc::now(),
        })
    }

    async fn enqueue(ledger: &Arc<InMemoryLedger>, n: usize) {
        for _ in 0..n {
            let l = ledger.clone();
            let res: Result<_, StoreError> = with_transaction(&**ledger, |tx| async move {
                publish_via_outbox(&*l, &tx, &received(TenantId::new())).await
            })
            .await;
            assert!(res.is_ok());
        }
    }

    #[tokio::test]
    async fn failed_rows_stay_unsent_and_are_retried() {
        let ledger = Arc::new(InMemoryLedger::new());
        enqueue(&ledger, 2).await;

        let sub = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        });
        let dispatcher =
            OutboxDispatcher::new(ledger.clone(), ledger.clone()).with_subscriber(sub.clone());

        let first = dispatcher.dispatch(10).await.unwrap();
        assert_eq!(first, DispatchReport { claimed: 2, delivered: 1, failed: 1 });

        let second = dispatcher.dispatch(10).await.unwrap();
        assert_eq!(second, DispatchReport { claimed: 1, delivered: 1, failed: 0 });

        assert!(ledger.outbox_records().iter().all(|r| r.is_sent()));
        assert_eq!(dispatcher.dispatch(10).await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn batch_size_bounds_a_pass() {
        let ledger = Arc::new(InMemoryLedger::new());
        enqueue(&ledger, 3).await;

        let dispatcher = OutboxDispatcher::new(ledger.clone(), ledger.clone());
        assert_eq!(dispatcher.dispatch(2).await.unwrap().delivered, 2);
        assert_eq!(dispatcher.dispatch(2).await.unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn undecodable_rows_are_not_marked_sent() {
        let ledger = Arc::new(InMemoryLedger::new());
        let l = ledger.clone();
        let res: Result<_, StoreError> = with_transaction(&*ledger, |tx| async move {
            l.insert_record(
                &tx,
                OutboxRecord {
                    id: tallyline_core::OutboxId::new(),
                    tenant_id: TenantId::new(),
                    event_type: "inventory.stock_teleported".into(),
                    payload: serde_json::json!({ "v": 1 }),
                    created_at: Utc::now(),
                    sent_at: None,
                },
            )
            .await
        })
        .await;
        assert!(res.is_ok());

        let dispatcher = OutboxDispatcher::new(ledger.clone(), ledger.clone());
        let report = dispatcher.dispatch(10).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!ledger.outbox_records()[0].is_sent());
    }

    #[tokio::test]
    async fn spawned_loop_drains_and_stops() {
        let ledger = Arc::new(InMemoryLedger::new());
        enqueue(&ledger, 3).await;

        let handle = OutboxDispatcher::new(ledger.clone(), ledger.clone()).spawn(
            OutboxDispatcherConfig::default()
                .with_name("test-dispatcher")
                .with_poll_interval(Duration::from_millis(10)),
        );

        for _ in 0..100 {
            if ledger.outbox_records().iter().all(|r| r.is_sent()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ledger.outbox_records().iter().all(|r| r.is_sent()));
        assert_eq!(handle.stats().delivered, 3);
        handle.shutdown().await;
    }

    struct RollbackFails(Arc<InMemoryLedger>);

    #[async_trait]
    impl TransactionManager for RollbackFails {
        type Tx = MemoryTx;

        async fn begin(&self) -> Result<MemoryTx, StoreError> {
            self.0.begin().await
        }

        async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
            self.0.commit(tx).await
        }

        async fn rollback(&self, _tx: MemoryTx) -> Result<(), StoreError> {
            Err(StoreError::Transaction("connection dropped".into()))
        }
    }

    struct LockFails;

    #[async_trait]
    impl OutboxStore<MemoryTx> for LockFails {
        async fn insert_record(&self, _tx: &MemoryTx, _record: OutboxRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn lock_unsent(&self, _tx: &MemoryTx, _limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
            Err(StoreError::Backend("lock timeout".into()))
        }

        async fn mark_sent(
            &self,
            _tx: &MemoryTx,
            _id: tallyline_core::OutboxId,
            _sent_at: chrono::DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn batch_error_survives_a_failed_rollback() {
        let ledger = Arc::new(InMemoryLedger::new());
        let outbox: Arc<dyn OutboxStore<MemoryTx>> = Arc::new(LockFails);
        let dispatcher = OutboxDispatcher::new(Arc::new(RollbackFails(ledger)), outbox);

        let err = dispatcher.dispatch(10).await.unwrap_err();
        assert_eq!(err, StoreError::Backend("lock timeout".into()));
    }
}
