//! Policy and catalog lookups read straight from the pool, outside any
//! ledger transaction.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::instrument;

use tallyline_cash::CashSessionPolicies;
use tallyline_core::{BranchId, CashAmounts, StockItemId, TenantId};

use crate::ports::{BranchAssignment, CashPolicyPort, PortError, StockCatalogPort};

fn port_error(operation: &str, err: sqlx::Error) -> PortError {
    PortError::new(format!("{operation} failed: {err}"))
}

/// `cash_session_policies` table. A tenant without a row gets the defaults.
#[derive(Debug, Clone)]
pub struct PgCashPolicies {
    pool: Arc<PgPool>,
}

impl PgCashPolicies {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CashPolicyPort for PgCashPolicies {
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn cash_session_policies(
        &self,
        tenant_id: TenantId,
    ) -> Result<CashSessionPolicies, PortError> {
        let row = sqlx::query(
            r#"
            SELECT
                require_session_for_sales,
                allow_paid_out,
                require_refund_approval,
                allow_manual_adjustment,
                paid_out_limit_usd,
                paid_out_limit_khr,
                variance_review_threshold_usd,
                variance_review_threshold_khr
            FROM cash_session_policies
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| port_error("cash_session_policies", e))?;

        let Some(row) = row else {
            return Ok(CashSessionPolicies::default());
        };

        let decode = || -> Result<CashSessionPolicies, sqlx::Error> {
            let limit_usd: Option<Decimal> = row.try_get("paid_out_limit_usd")?;
            let limit_khr: Option<Decimal> = row.try_get("paid_out_limit_khr")?;
            let paid_out_limit = match (limit_usd, limit_khr) {
                (None, None) => None,
                (usd, khr) => Some(CashAmounts {
                    usd: usd.unwrap_or(Decimal::MAX),
                    khr: khr.unwrap_or(Decimal::MAX),
                }),
            };
            Ok(CashSessionPolicies {
                require_session_for_sales: row.try_get("require_session_for_sales")?,
                allow_paid_out: row.try_get("allow_paid_out")?,
                require_refund_approval: row.try_get("require_refund_approval")?,
                allow_manual_adjustment: row.try_get("allow_manual_adjustment")?,
                paid_out_limit,
                variance_review_threshold: CashAmounts {
                    usd: row.try_get("variance_review_threshold_usd")?,
                    khr: row.try_get("variance_review_threshold_khr")?,
                },
            })
        };
        decode().map_err(|e| port_error("cash_session_policies", e))
    }
}

/// `stock_items` and `branch_stock_items` tables.
#[derive(Debug, Clone)]
pub struct PgStockCatalog {
    pool: Arc<PgPool>,
}

impl PgStockCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn assignment(row: &sqlx::postgres::PgRow) -> Result<BranchAssignment, sqlx::Error> {
    let item: uuid::Uuid = row.try_get("stock_item_id")?;
    Ok(BranchAssignment {
        stock_item_id: StockItemId::from_uuid(item),
        min_threshold: row.try_get("min_threshold")?,
    })
}

#[async_trait]
impl StockCatalogPort for PgStockCatalog {
    async fn stock_item_exists(
        &self,
        tenant_id: TenantId,
        stock_item_id: StockItemId,
    ) -> Result<bool, PortError> {
        sqlx::query("SELECT EXISTS (SELECT 1 FROM stock_items WHERE tenant_id = $1 AND id = $2) AS found")
            .bind(tenant_id.as_uuid())
            .bind(stock_item_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("found"))
            .map_err(|e| port_error("stock_item_exists", e))
    }

    async fn branch_assignment(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
    ) -> Result<Option<BranchAssignment>, PortError> {
        let row = sqlx::query(
            r#"
            SELECT stock_item_id, min_threshold
            FROM branch_stock_items
            WHERE tenant_id = $1 AND branch_id = $2 AND stock_item_id = $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(branch_id.as_uuid())
        .bind(stock_item_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| port_error("branch_assignment", e))?;

        row.as_ref()
            .map(assignment)
            .transpose()
            .map_err(|e| port_error("branch_assignment", e))
    }

    async fn assigned_items(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<BranchAssignment>, PortError> {
        let rows = sqlx::query(
            r#"
            SELECT stock_item_id, min_threshold
            FROM branch_stock_items
            WHERE tenant_id = $1 AND branch_id = $2
            ORDER BY stock_item_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(branch_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| port_error("assigned_items", e))?;

        rows.iter()
            .map(assignment)
            .collect::<Result<_, _>>()
            .map_err(|e| port_error("assigned_items", e))
    }
}
