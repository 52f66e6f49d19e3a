//! Ports to collaborators outside the ledger core: tenant cash policies and
//! the stock catalog. Both are injected at construction.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tallyline_cash::CashSessionPolicies;
use tallyline_core::{BranchId, StockItemId, TenantId};

/// A collaborator failed to answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PortError(String);

impl PortError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[async_trait]
pub trait CashPolicyPort: Send + Sync {
    /// Policies for the tenant; `CashSessionPolicies::default()` when none are configured.
    async fn cash_session_policies(
        &self,
        tenant_id: TenantId,
    ) -> Result<CashSessionPolicies, PortError>;
}

/// A stock item's assignment to a branch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchAssignment {
    pub stock_item_id: StockItemId,
    /// `None` when the branch never set one; treated as zero.
    pub min_threshold: Option<Decimal>,
}

impl BranchAssignment {
    pub fn threshold(&self) -> Decimal {
        self.min_threshold.unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
pub trait StockCatalogPort: Send + Sync {
    async fn stock_item_exists(
        &self,
        tenant_id: TenantId,
        stock_item_id: StockItemId,
    ) -> Result<bool, PortError>;

    async fn branch_assignment(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
    ) -> Result<Option<BranchAssignment>, PortError>;

    async fn assigned_items(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<BranchAssignment>, PortError>;
}

/// In-memory policy table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCashPolicies {
    inner: RwLock<HashMap<TenantId, CashSessionPolicies>>,
}

impl InMemoryCashPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: TenantId, policies: CashSessionPolicies) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(tenant_id, policies);
        }
    }
}

#[async_trait]
impl CashPolicyPort for InMemoryCashPolicies {
    async fn cash_session_policies(
        &self,
        tenant_id: TenantId,
    ) -> Result<CashSessionPolicies, PortError> {
        let map = self
            .inner
            .read()
            .map_err(|_| PortError::new("policy table lock poisoned"))?;
        Ok(map.get(&tenant_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    items: HashSet<(TenantId, StockItemId)>,
    assignments: HashMap<(TenantId, BranchId), Vec<BranchAssignment>>,
}

/// In-memory stock catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStockCatalog {
    inner: RwLock<CatalogState>,
}

impl InMemoryStockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, tenant_id: TenantId, stock_item_id: StockItemId) {
        if let Ok(mut s) = self.inner.write() {
            s.items.insert((tenant_id, stock_item_id));
        }
    }

    /// Assign (or re-assign) an item to a branch. Adds the item if unknown.
    pub fn assign(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        min_threshold: Option<Decimal>,
    ) {
        if let Ok(mut s) = self.inner.write() {
            s.items.insert((tenant_id, stock_item_id));
            let list = s.assignments.entry((tenant_id, branch_id)).or_default();
            list.retain(|a| a.stock_item_id != stock_item_id);
            list.push(BranchAssignment {
                stock_item_id,
                min_threshold,
            });
        }
    }
}

#[async_trait]
impl StockCatalogPort for InMemoryStockCatalog {
    async fn stock_item_exists(
        &self,
        tenant_id: TenantId,
        stock_item_id: StockItemId,
    ) -> Result<bool, PortError> {
        let s = self
            .inner
            .read()
            .map_err(|_| PortError::new("catalog lock poisoned"))?;
        Ok(s.items.contains(&(tenant_id, stock_item_id)))
    }

    async fn branch_assignment(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
    ) -> Result<Option<BranchAssignment>, PortError> {
        let s = self
            .inner
            .read()
            .map_err(|_| PortError::new("catalog lock poisoned"))?;
        Ok(s.assignments
            .get(&(tenant_id, branch_id))
            .and_then(|list| list.iter().find(|a| a.stock_item_id == stock_item_id))
            .copied())
    }

    async fn assigned_items(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<BranchAssignment>, PortError> {
        let s = self
            .inner
            .read()
            .map_err(|_| PortError::new("catalog lock poisoned"))?;
        Ok(s.assignments
            .get(&(tenant_id, branch_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_policy_row_means_safe_defaults() {
        let policies = InMemoryCashPolicies::new();
        let p = policies.cash_session_policies(TenantId::new()).await.unwrap();
        assert_eq!(p, CashSessionPolicies::default());
        assert!(p.require_refund_approval);
    }

    #[tokio::test]
    async fn assignment_is_per_branch() {
        let catalog = InMemoryStockCatalog::new();
        let (t, b, item) = (TenantId::new(), BranchId::new(), StockItemId::new());
        catalog.assign(t, b, item, None);

        assert!(catalog.stock_item_exists(t, item).await.unwrap());
        let a = catalog.branch_assignment(t, b, item).await.unwrap().unwrap();
        assert_eq!(a.threshold(), Decimal::ZERO);
        assert!(catalog.branch_assignment(t, BranchId::new(), item).await.unwrap().is_none());
        assert!(!catalog.stock_item_exists(TenantId::new(), item).await.unwrap());
    }
}
