//! Inventory movement use cases.
//!
//! Each call validates and plans before touching storage, then appends every
//! planned line, publishes one event and writes the audit record inside a
//! single transaction. A failing line rolls the whole call back.
//!
//! These calls are not idempotent: two identical requests append twice.
//! Deduplication belongs to the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use tallyline_core::{DomainError, ValidationReason};
use tallyline_inventory::{
    CorrectStock, InventoryCommand, InventoryEntry, InventoryEvent, ReceiveStock, SaleMovement,
    SaleStockLines, WasteStock,
};

use crate::audit::AuditRecord;
use crate::error::UseCaseError;
use crate::outbox::publish_via_outbox;
use crate::ports::StockCatalogPort;
use crate::store::LedgerStores;
use crate::transaction::{TransactionManager, with_transaction};

pub struct InventoryMovements<M: TransactionManager> {
    transactions: Arc<M>,
    stores: LedgerStores<M::Tx>,
    catalog: Arc<dyn StockCatalogPort>,
}

impl<M: TransactionManager> InventoryMovements<M> {
    pub fn new(
        transactions: Arc<M>,
        stores: LedgerStores<M::Tx>,
        catalog: Arc<dyn StockCatalogPort>,
    ) -> Self {
        Self {
            transactions,
            stores,
            catalog,
        }
    }

    pub async fn receive(&self, cmd: ReceiveStock) -> Result<InventoryEntry, UseCaseError> {
        single(self.execute(InventoryCommand::Receive(cmd)).await?)
    }

    pub async fn waste(&self, cmd: WasteStock) -> Result<InventoryEntry, UseCaseError> {
        single(self.execute(InventoryCommand::Waste(cmd)).await?)
    }

    pub async fn correct(&self, cmd: CorrectStock) -> Result<InventoryEntry, UseCaseError> {
        single(self.execute(InventoryCommand::Correct(cmd)).await?)
    }

    pub async fn deduct_sale(&self, cmd: SaleStockLines) -> Result<Vec<InventoryEntry>, UseCaseError> {
        self.execute(InventoryCommand::Sale(SaleMovement::Deduct, cmd))
            .await
    }

    /// Add back exactly the quantities in `cmd`, which must be the lines the
    /// original deduction removed.
    pub async fn void_sale(&self, cmd: SaleStockLines) -> Result<Vec<InventoryEntry>, UseCaseError> {
        self.execute(InventoryCommand::Sale(SaleMovement::Void, cmd))
            .await
    }

    /// Deduct again for a sale reopened after a void. The void's entries stay.
    pub async fn reopen_sale(&self, cmd: SaleStockLines) -> Result<Vec<InventoryEntry>, UseCaseError> {
        self.execute(InventoryCommand::Sale(SaleMovement::Reopen, cmd))
            .await
    }

    #[instrument(
        skip(self, cmd),
        fields(tenant_id = %cmd.tenant_id(), branch_id = %cmd.branch_id()),
        err
    )]
    pub async fn execute(&self, cmd: InventoryCommand) -> Result<Vec<InventoryEntry>, UseCaseError> {
        let planned = cmd.plan(Utc::now())?;
        if cmd.requires_branch_assignment() {
            self.ensure_assigned(&cmd).await?;
        }

        let stores = self.stores.clone();
        let (entries, event) = with_transaction(&*self.transactions, |tx| async move {
            let mut stored = Vec::with_capacity(planned.len());
            for entry in planned {
                stored.push(stores.inventory.append_entry(&tx, entry).await?);
            }

            let event = event_for(&cmd, &stored)?;
            publish_via_outbox(&*stores.outbox, &tx, &event).await?;
            if let Some(record) = AuditRecord::for_inventory(&event) {
                stores.audit.write_audit(&tx, record).await?;
            }
            Ok::<_, UseCaseError>((stored, event))
        })
        .await?;

        info!(
            event_type = %tallyline_events::Event::event_type(&event),
            lines = entries.len(),
            "inventory movement recorded"
        );
        Ok(entries)
    }

    async fn ensure_assigned(&self, cmd: &InventoryCommand) -> Result<(), UseCaseError> {
        let (tenant_id, branch_id) = (cmd.tenant_id(), cmd.branch_id());
        for stock_item_id in cmd.stock_item_ids() {
            if !self.catalog.stock_item_exists(tenant_id, stock_item_id).await? {
                return Err(DomainError::not_found(format!("stock item {stock_item_id}")).into());
            }
            if self
                .catalog
                .branch_assignment(tenant_id, branch_id, stock_item_id)
                .await?
                .is_none()
            {
                return Err(DomainError::validation(
                    ValidationReason::ItemNotAssigned,
                    format!("stock item {stock_item_id} is not assigned to branch {branch_id}"),
                )
                .into());
            }
        }
        Ok(())
    }
}

fn event_for(cmd: &InventoryCommand, stored: &[InventoryEntry]) -> Result<InventoryEvent, DomainError> {
    let first = stored
        .first()
        .ok_or_else(|| DomainError::invariant("movement produced no entries"))?;
    match cmd {
        InventoryCommand::Sale(kind, c) => Ok(InventoryEvent::for_sale(
            *kind,
            c.tenant_id,
            c.branch_id,
            c.sale_id,
            c.actor_id,
            first.occurred_at,
            stored,
        )),
        _ => InventoryEvent::for_entry(first)
            .ok_or_else(|| DomainError::invariant("single movement stored with a sale reason")),
    }
}

fn single(mut entries: Vec<InventoryEntry>) -> Result<InventoryEntry, UseCaseError> {
    if entries.len() != 1 {
        return Err(DomainError::invariant(format!(
            "expected one entry, got {}",
            entries.len()
        ))
        .into());
    }
    entries
        .pop()
        .ok_or_else(|| DomainError::invariant("expected one entry").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use tallyline_core::{BranchId, Quantity, StockItemId, TenantId, UserId};

    use crate::memory::InMemoryLedger;
    use crate::ports::InMemoryStockCatalog;

    fn service(
        ledger: &Arc<InMemoryLedger>,
        catalog: Arc<InMemoryStockCatalog>,
    ) -> InventoryMovements<InMemoryLedger> {
        InventoryMovements::new(ledger.clone(), LedgerStores::from_backend(ledger.clone()), catalog)
    }

    #[tokio::test]
    async fn unassigned_item_is_rejected_before_any_write() {
        let ledger = Arc::new(InMemoryLedger::new());
        let catalog = Arc::new(InMemoryStockCatalog::new());
        let (t, b, i) = (TenantId::new(), BranchId::new(), StockItemId::new());
        catalog.add_item(t, i);

        let err = service(&ledger, catalog)
            .receive(ReceiveStock {
                tenant_id: t,
                branch_id: b,
                stock_item_id: i,
                quantity: Quantity::from(1),
                note: None,
                actor_id: UserId::new(),
                occurred_at: None,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.domain().and_then(DomainError::validation_reason),
            Some(ValidationReason::ItemNotAssigned)
        );
        assert!(ledger.inventory_entries().is_empty());
        assert!(ledger.outbox_records().is_empty());
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let ledger = Arc::new(InMemoryLedger::new());
        let err = service(&ledger, Arc::new(InMemoryStockCatalog::new()))
            .correct(CorrectStock {
                tenant_id: TenantId::new(),
                branch_id: BranchId::new(),
                stock_item_id: StockItemId::new(),
                delta: Decimal::from(-2),
                note: "recount".into(),
                actor_id: UserId::new(),
                occurred_at: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn correction_is_audited_and_published_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let catalog = Arc::new(InMemoryStockCatalog::new());
        let (t, b, i) = (TenantId::new(), BranchId::new(), StockItemId::new());
        catalog.assign(t, b, i, None);

        let entry = service(&ledger, catalog)
            .correct(CorrectStock {
                tenant_id: t,
                branch_id: b,
                stock_item_id: i,
                delta: Decimal::from(-2),
                note: "  shelf recount ".into(),
                actor_id: UserId::new(),
                occurred_at: None,
            })
            .await
            .unwrap();

        assert_eq!(entry.delta, Decimal::from(-2));
        assert_eq!(entry.note.as_deref(), Some("shelf recount"));
        let outbox = ledger.outbox_records();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "inventory.stock_corrected");
        assert_eq!(outbox[0].payload["v"], 1);
        assert_eq!(ledger.audit_records().len(), 1);
    }
}
