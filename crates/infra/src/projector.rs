//! Read-only balance projections.
//!
//! Every call re-aggregates from the ledgers inside a read transaction that is
//! always rolled back. Nothing is cached between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tallyline_cash::{CashMovement, SessionTotals};
use tallyline_core::{BranchId, CashSessionId, DomainError, StockItemId, TenantId};
use tallyline_inventory::{InventoryEntry, JournalFilter};

use crate::error::UseCaseError;
use crate::ports::StockCatalogPort;
use crate::store::{LedgerStores, RowLock};
use crate::transaction::{TransactionManager, read_only};

/// An item at or below its branch minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    pub stock_item_id: StockItemId,
    pub on_hand: Decimal,
    pub min_threshold: Decimal,
}

pub struct BalanceProjector<M: TransactionManager> {
    transactions: Arc<M>,
    stores: LedgerStores<M::Tx>,
    catalog: Arc<dyn StockCatalogPort>,
}

impl<M: TransactionManager> Clone for BalanceProjector<M> {
    fn clone(&self) -> Self {
        Self {
            transactions: self.transactions.clone(),
            stores: self.stores.clone(),
            catalog: self.catalog.clone(),
        }
    }
}

impl<M: TransactionManager> BalanceProjector<M> {
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

    /// Current on-hand: the sum of every delta for the item at the branch.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, branch_id = %branch_id, stock_item_id = %stock_item_id), err)]
    pub async fn on_hand(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
    ) -> Result<Decimal, UseCaseError> {
        self.balance(tenant_id, branch_id, stock_item_id, None).await
    }

    /// On-hand as of a business time (entries with `occurred_at <= as_of`).
    pub async fn balance_at(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        as_of: DateTime<Utc>,
    ) -> Result<Decimal, UseCaseError> {
        self.balance(tenant_id, branch_id, stock_item_id, Some(as_of))
            .await
    }

    async fn balance(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Decimal, UseCaseError> {
        let inventory = self.stores.inventory.clone();
        read_only(&*self.transactions, |tx| async move {
            Ok(inventory
                .sum_deltas(&tx, tenant_id, branch_id, stock_item_id, as_of)
                .await?)
        })
        .await
    }

    /// Journal of one item at a branch, oldest first.
    pub async fn journal(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        filter: JournalFilter,
    ) -> Result<Vec<InventoryEntry>, UseCaseError> {
        let inventory = self.stores.inventory.clone();
        read_only(&*self.transactions, |tx| async move {
            Ok(inventory
                .query_entries(&tx, tenant_id, branch_id, stock_item_id, &filter)
                .await?)
        })
        .await
    }

    /// On-hand of every item with journal entries at the branch.
    pub async fn on_hand_by_branch(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<BTreeMap<StockItemId, Decimal>, UseCaseError> {
        let inventory = self.stores.inventory.clone();
        read_only(&*self.transactions, |tx| async move {
            let sums = inventory.sum_deltas_by_item(&tx, tenant_id, branch_id).await?;
            Ok(sums.into_iter().collect())
        })
        .await
    }

    /// Items whose on-hand is at or below their branch minimum.
    ///
    /// Covers assigned items (even with no entries yet) and any item with
    /// entries at the branch. Missing thresholds count as zero.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, branch_id = %branch_id), err)]
    pub async fn low_stock_alerts(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<LowStockAlert>, UseCaseError> {
        let assigned = self.catalog.assigned_items(tenant_id, branch_id).await?;
        let on_hand = self.on_hand_by_branch(tenant_id, branch_id).await?;

        let mut thresholds: BTreeMap<StockItemId, Decimal> = on_hand
            .keys()
            .map(|id| (*id, Decimal::ZERO))
            .collect();
        for a in &assigned {
            thresholds.insert(a.stock_item_id, a.threshold());
        }

        Ok(thresholds
            .into_iter()
            .filter_map(|(stock_item_id, min_threshold)| {
                let on_hand = on_hand.get(&stock_item_id).copied().unwrap_or_default();
                (on_hand <= min_threshold).then_some(LowStockAlert {
                    stock_item_id,
                    on_hand,
                    min_threshold,
                })
            })
            .collect())
    }

    /// Drawer totals of a session: opening float plus its movements.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id), err)]
    pub async fn session_totals(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<SessionTotals, UseCaseError> {
        let stores = self.stores.clone();
        read_only(&*self.transactions, |tx| async move {
            let session = stores
                .sessions
                .load_session(&tx, tenant_id, session_id, RowLock::None)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("cash session {session_id}")))?;
            let (cash_in, cash_out) = stores.cash.session_flows(&tx, tenant_id, session_id).await?;
            Ok(SessionTotals::from_flows(
                session.opening_float(),
                cash_in,
                cash_out,
            )?)
        })
        .await
    }

    pub async fn session_movements(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<Vec<CashMovement>, UseCaseError> {
        let cash = self.stores.cash.clone();
        read_only(&*self.transactions, |tx| async move {
            Ok(cash.session_movements(&tx, tenant_id, session_id).await?)
        })
        .await
    }
}
