//! In-process outbox subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tallyline_core::{BranchId, StockItemId};
use tallyline_events::{EventBus, EventEnvelope, EventSubscriber, SubscriberError};

use crate::outbox::DomainEvent;
use crate::ports::StockCatalogPort;
use crate::projector::BalanceProjector;
use crate::read_model::TenantStore;
use crate::transaction::TransactionManager;

/// Current stock level of an item at a branch, as last seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub branch_id: BranchId,
    pub stock_item_id: StockItemId,
    pub on_hand: Decimal,
    pub min_threshold: Decimal,
    pub low: bool,
}

pub type StockLevelKey = (BranchId, StockItemId);

/// Keeps a per-tenant table of stock levels and low-stock flags.
///
/// On every inventory event it re-reads on-hand from the ledger instead of
/// applying the event's delta, so a redelivered event rewrites the same row
/// and never double-counts.
pub struct LowStockMonitor<M, S>
where
    M: TransactionManager,
    S: TenantStore<StockLevelKey, StockLevel>,
{
    projector: BalanceProjector<M>,
    catalog: Arc<dyn StockCatalogPort>,
    levels: S,
}

impl<M, S> LowStockMonitor<M, S>
where
    M: TransactionManager,
    S: TenantStore<StockLevelKey, StockLevel>,
{
    pub fn new(projector: BalanceProjector<M>, catalog: Arc<dyn StockCatalogPort>, levels: S) -> Self {
        Self {
            projector,
            catalog,
            levels,
        }
    }

    pub fn levels(&self) -> &S {
        &self.levels
    }
}

#[async_trait]
impl<M, S> EventSubscriber<DomainEvent> for LowStockMonitor<M, S>
where
    M: TransactionManager + 'static,
    S: TenantStore<StockLevelKey, StockLevel> + 'static,
{
    fn name(&self) -> &str {
        "low-stock-monitor"
    }

    async fn handle(&self, envelope: &EventEnvelope<DomainEvent>) -> Result<(), SubscriberError> {
        let Some(event) = envelope.payload().as_inventory() else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();
        let branch_id = event.branch_id();
        let fail = |e: &dyn std::fmt::Display| SubscriberError::new(self.name(), e.to_string());

        for stock_item_id in event.stock_item_ids() {
            let on_hand = self
                .projector
                .on_hand(tenant_id, branch_id, stock_item_id)
                .await
                .map_err(|e| fail(&e))?;
            let min_threshold = self
                .catalog
                .branch_assignment(tenant_id, branch_id, stock_item_id)
                .await
                .map_err(|e| fail(&e))?
                .map(|a| a.threshold())
                .unwrap_or(Decimal::ZERO);

            let level = StockLevel {
                branch_id,
                stock_item_id,
                on_hand,
                min_threshold,
                low: on_hand <= min_threshold,
            };
            let was_low = self
                .levels
                .get(tenant_id, &(branch_id, stock_item_id))
                .is_some_and(|l| l.low);
            if level.low && !was_low {
                info!(
                    tenant_id = %tenant_id,
                    branch_id = %branch_id,
                    stock_item_id = %stock_item_id,
                    on_hand = %on_hand,
                    min_threshold = %min_threshold,
                    "stock item fell to its minimum"
                );
            }
            self.levels
                .upsert(tenant_id, (branch_id, stock_item_id), level);
        }
        Ok(())
    }
}

/// Fans delivered envelopes out on an [`EventBus`] for realtime consumers.
pub struct BusForwarder<B> {
    bus: B,
}

impl<B> BusForwarder<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B> EventSubscriber<DomainEvent> for BusForwarder<B>
where
    B: EventBus<EventEnvelope<DomainEvent>> + 'static,
{
    fn name(&self) -> &str {
        "bus-forwarder"
    }

    async fn handle(&self, envelope: &EventEnvelope<DomainEvent>) -> Result<(), SubscriberError> {
        self.bus
            .publish(envelope.clone())
            .map_err(|e| SubscriberError::new(self.name(), format!("{e:?}")))?;
        debug!(outbox_id = %envelope.outbox_id(), event_type = %envelope.event_type(), "forwarded to bus");
        Ok(())
    }
}
