//! Scoped transactions with an explicit handle.
//!
//! There is no ambient transaction: `with_transaction` hands the closure a
//! handle, and every store call made inside must be given that handle. The
//! unit of work commits when the closure returns `Ok` and rolls back on `Err`.

use std::future::Future;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;

#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Cheap to clone; every clone refers to the same unit of work.
    type Tx: Clone + Send + Sync + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;
}

/// Run `f` inside a transaction. Commit on `Ok`, roll back on `Err`.
///
/// A failed commit is returned as an error; nothing from the unit of work is
/// visible afterwards.
pub async fn with_transaction<M, F, Fut, T, E>(manager: &M, f: F) -> Result<T, E>
where
    M: TransactionManager + ?Sized,
    F: FnOnce(M::Tx) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    let tx = manager.begin().await?;
    match f(tx.clone()).await {
        Ok(value) => {
            manager.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = manager.rollback(tx).await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Run read-only work inside a transaction that is always rolled back.
pub async fn read_only<M, F, Fut, T, E>(manager: &M, f: F) -> Result<T, E>
where
    M: TransactionManager + ?Sized,
    F: FnOnce(M::Tx) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    let tx = manager.begin().await?;
    let result = f(tx.clone()).await;
    if let Err(rollback_err) = manager.rollback(tx).await {
        warn!(error = %rollback_err, "rollback of read transaction failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::memory::InMemoryLedger;
    use crate::store::InventoryLedgerStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tallyline_core::{BranchId, StockItemId, TenantId};
    use tallyline_inventory::{InventoryReason, NewInventoryEntry};

    fn entry(tenant: TenantId, branch: BranchId, item: StockItemId) -> NewInventoryEntry {
        NewInventoryEntry {
            tenant_id: tenant,
            branch_id: branch,
            stock_item_id: item,
            delta: Decimal::from(5),
            reason: InventoryReason::Receive,
            ref_sale_id: None,
            note: None,
            actor_id: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ok_commits() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (t, b, i) = (TenantId::new(), BranchId::new(), StockItemId::new());

        let res: Result<_, StoreError> = with_transaction(&*ledger, |tx| {
            let ledger = ledger.clone();
            async move { ledger.append_entry(&tx, entry(t, b, i)).await }
        })
        .await;
        assert!(res.is_ok());
        assert_eq!(ledger.inventory_entries().len(), 1);
    }

    #[tokio::test]
    async fn err_rolls_back() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (t, b, i) = (TenantId::new(), BranchId::new(), StockItemId::new());

        let res: Result<(), StoreError> = with_transaction(&*ledger, |tx| {
            let ledger = ledger.clone();
            async move {
                ledger.append_entry(&tx, entry(t, b, i)).await?;
                Err(StoreError::Backend("boom".into()))
            }
        })
        .await;
        assert!(res.is_err());
        assert!(ledger.inventory_entries().is_empty());
    }
}
