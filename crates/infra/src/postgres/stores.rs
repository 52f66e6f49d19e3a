//! Ledger, session and audit stores on the caller's transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use tracing::{Span, instrument};

use tallyline_cash::{CashMovement, CashSession, NewCashMovement, SessionScope};
use tallyline_core::{
    AggregateRoot, BranchId, CashAmounts, CashMovementId, CashSessionId, ExpectedVersion,
    LedgerEntryId, StockItemId, TenantId,
};
use tallyline_inventory::{InventoryEntry, JournalFilter, NewInventoryEntry};

use super::rows::{
    CashMovementRow, CashSessionRow, INVENTORY_COLUMNS, InventoryEntryRow, MOVEMENT_COLUMNS,
    SESSION_COLUMNS, decode_all,
};
use super::{PgLedger, PgTx, conn, is_unique_violation, map_sqlx_error};
use crate::audit::{AuditRecord, AuditWriter};
use crate::error::StoreError;
use crate::store::{CashLedgerStore, CashSessionStore, InventoryLedgerStore, RowLock};

fn to_i64(operation: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{value} out of range in {operation}")))
}

#[async_trait]
impl InventoryLedgerStore<PgTx> for PgLedger {
    #[instrument(
        skip(self, tx, entry),
        fields(
            tenant_id = %entry.tenant_id,
            branch_id = %entry.branch_id,
            stock_item_id = %entry.stock_item_id,
            reason = %entry.reason
        ),
        err
    )]
    async fn append_entry(
        &self,
        tx: &PgTx,
        entry: NewInventoryEntry,
    ) -> Result<InventoryEntry, StoreError> {
        let id = LedgerEntryId::new();
        let mut guard = tx.0.lock().await;

        let created_at: DateTime<Utc> = sqlx::query(
            r#"
            INSERT INTO inventory_ledger (
                id, tenant_id, branch_id, stock_item_id, delta, reason,
                ref_sale_id, note, actor_id, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.branch_id.as_uuid())
        .bind(entry.stock_item_id.as_uuid())
        .bind(entry.delta)
        .bind(entry.reason.as_str())
        .bind(entry.ref_sale_id.map(uuid::Uuid::from))
        .bind(entry.note.as_deref())
        .bind(entry.actor_id.map(uuid::Uuid::from))
        .bind(entry.occurred_at)
        .fetch_one(conn(&mut guard)?)
        .await
        .and_then(|row| row.try_get("created_at"))
        .map_err(|e| map_sqlx_error("append_entry", e))?;

        Ok(InventoryEntry::from_new(entry, id, created_at))
    }

    async fn query_entries(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        filter: &JournalFilter,
    ) -> Result<Vec<InventoryEntry>, StoreError> {
        let limit = filter
            .limit
            .map(|l| to_i64("query_entries", l as u64))
            .transpose()?;
        let sql = format!(
            r#"
            SELECT {INVENTORY_COLUMNS}
            FROM inventory_ledger
            WHERE tenant_id = $1 AND branch_id = $2 AND stock_item_id = $3
              AND ($4::TEXT IS NULL OR reason = $4)
              AND ($5::UUID IS NULL OR ref_sale_id = $5)
              AND ($6::TIMESTAMPTZ IS NULL OR occurred_at >= $6)
              AND ($7::TIMESTAMPTZ IS NULL OR occurred_at <= $7)
            ORDER BY occurred_at ASC, seq ASC
            LIMIT $8
            "#
        );

        let mut guard = tx.0.lock().await;
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(branch_id.as_uuid())
            .bind(stock_item_id.as_uuid())
            .bind(filter.reason.map(|r| r.as_str()))
            .bind(filter.ref_sale_id.map(uuid::Uuid::from))
            .bind(filter.occurred_from)
            .bind(filter.occurred_to)
            .bind(limit)
            .fetch_all(conn(&mut guard)?)
            .await
            .map_err(|e| map_sqlx_error("query_entries", e))?;

        decode_all::<InventoryEntryRow, _>("query_entries", rows)
    }

    async fn sum_deltas(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Decimal, StoreError> {
        let mut guard = tx.0.lock().await;
        sqlx::query(
            r#"
            SELECT COALESCE(SUM(delta), 0) AS total
            FROM inventory_ledger
            WHERE tenant_id = $1 AND branch_id = $2 AND stock_item_id = $3
              AND ($4::TIMESTAMPTZ IS NULL OR occurred_at <= $4)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(branch_id.as_uuid())
        .bind(stock_item_id.as_uuid())
        .bind(as_of)
        .fetch_one(conn(&mut guard)?)
        .await
        .and_then(|row| row.try_get("total"))
        .map_err(|e| map_sqlx_error("sum_deltas", e))
    }

    async fn sum_deltas_by_item(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<(StockItemId, Decimal)>, StoreError> {
        let mut guard = tx.0.lock().await;
        let rows = sqlx::query(
            r#"
            SELECT stock_item_id, SUM(delta) AS total
            FROM inventory_ledger
            WHERE tenant_id = $1 AND branch_id = $2
            GROUP BY stock_item_id
            ORDER BY stock_item_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(branch_id.as_uuid())
        .fetch_all(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("sum_deltas_by_item", e))?;

        rows.iter()
            .map(|row| {
                let item: uuid::Uuid = row.try_get("stock_item_id")?;
                let total: Decimal = row.try_get("total")?;
                Ok((StockItemId::from_uuid(item), total))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("sum_deltas_by_item", e))
    }
}

#[async_trait]
impl CashLedgerStore<PgTx> for PgLedger {
    #[instrument(
        skip(self, tx, movement),
        fields(
            tenant_id = %movement.tenant_id,
            session_id = %movement.session_id,
            movement_type = %movement.movement_type
        ),
        err
    )]
    async fn append_movement(
        &self,
        tx: &PgTx,
        movement: NewCashMovement,
    ) -> Result<CashMovement, StoreError> {
        let id = CashMovementId::new();
        let mut guard = tx.0.lock().await;

        let created_at: DateTime<Utc> = sqlx::query(
            r#"
            INSERT INTO cash_movements (
                id, tenant_id, branch_id, register_id, session_id, actor_id, type, status,
                amount_usd, amount_khr, ref_sale_id, reason, approved_by, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(movement.tenant_id.as_uuid())
        .bind(movement.branch_id.as_uuid())
        .bind(movement.register_id.map(uuid::Uuid::from))
        .bind(movement.session_id.as_uuid())
        .bind(movement.actor_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(movement.status.as_str())
        .bind(movement.amount.usd)
        .bind(movement.amount.khr)
        .bind(movement.ref_sale_id.map(uuid::Uuid::from))
        .bind(movement.reason.as_deref())
        .bind(movement.approved_by.map(uuid::Uuid::from))
        .bind(movement.occurred_at)
        .fetch_one(conn(&mut guard)?)
        .await
        .and_then(|row| row.try_get("created_at"))
        .map_err(|e| map_sqlx_error("append_movement", e))?;

        Ok(CashMovement::from_new(movement, id, created_at))
    }

    async fn session_movements(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<Vec<CashMovement>, StoreError> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM cash_movements
            WHERE tenant_id = $1 AND session_id = $2
            ORDER BY occurred_at ASC, seq ASC
            "#
        );
        let mut guard = tx.0.lock().await;
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(session_id.as_uuid())
            .fetch_all(conn(&mut guard)?)
            .await
            .map_err(|e| map_sqlx_error("session_movements", e))?;

        decode_all::<CashMovementRow, _>("session_movements", rows)
    }

    async fn session_flows(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<(CashAmounts, CashAmounts), StoreError> {
        let mut guard = tx.0.lock().await;
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount_usd) FILTER (WHERE amount_usd > 0), 0) AS in_usd,
                COALESCE(SUM(amount_khr) FILTER (WHERE amount_khr > 0), 0) AS in_khr,
                COALESCE(-SUM(amount_usd) FILTER (WHERE amount_usd < 0), 0) AS out_usd,
                COALESCE(-SUM(amount_khr) FILTER (WHERE amount_khr < 0), 0) AS out_khr
            FROM cash_movements
            WHERE tenant_id = $1 AND session_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(session_id.as_uuid())
        .fetch_one(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("session_flows", e))?;

        let get = |col: &str| -> Result<Decimal, StoreError> {
            row.try_get(col).map_err(|e| map_sqlx_error("session_flows", e))
        };
        Ok((
            CashAmounts {
                usd: get("in_usd")?,
                khr: get("in_khr")?,
            },
            CashAmounts {
                usd: get("out_usd")?,
                khr: get("out_khr")?,
            },
        ))
    }
}

#[async_trait]
impl CashSessionStore<PgTx> for PgLedger {
    #[instrument(skip(self, tx, session), fields(tenant_id = %session.tenant_id(), session_id = %session.id()), err)]
    async fn insert_session(&self, tx: &PgTx, session: &CashSession) -> Result<(), StoreError> {
        let s = session.snapshot();
        let closing = s.closing.as_ref();
        let mut guard = tx.0.lock().await;

        sqlx::query(
            r#"
            INSERT INTO cash_sessions (
                id, tenant_id, branch_id, register_id, status, opened_by, responsible_actor,
                opened_at, opening_float_usd, opening_float_khr, closed_by, closed_at,
                expected_usd, expected_khr, counted_usd, counted_khr, variance_usd, variance_khr,
                review_requested_by, approved_by, approved_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.tenant_id.as_uuid())
        .bind(s.branch_id.as_uuid())
        .bind(s.register_id.map(uuid::Uuid::from))
        .bind(s.status.as_str())
        .bind(s.opened_by.as_uuid())
        .bind(s.responsible_actor.as_uuid())
        .bind(s.opened_at)
        .bind(s.opening_float.usd)
        .bind(s.opening_float.khr)
        .bind(closing.map(|c| uuid::Uuid::from(c.closed_by)))
        .bind(closing.map(|c| c.closed_at))
        .bind(closing.map(|c| c.expected_cash.usd))
        .bind(closing.map(|c| c.expected_cash.khr))
        .bind(closing.map(|c| c.counted_cash.usd))
        .bind(closing.map(|c| c.counted_cash.khr))
        .bind(closing.map(|c| c.variance.usd))
        .bind(closing.map(|c| c.variance.khr))
        .bind(s.review_requested_by.map(uuid::Uuid::from))
        .bind(s.approved_by.map(uuid::Uuid::from))
        .bind(s.approved_at)
        .bind(to_i64("insert_session", s.version)?)
        .execute(conn(&mut guard)?)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "an open cash session already exists for the slot of {}",
                    s.id
                ))
            } else {
                map_sqlx_error("insert_session", e)
            }
        })?;

        Ok(())
    }

    #[instrument(
        skip(self, tx, session),
        fields(tenant_id = %session.tenant_id(), session_id = %session.id(), expected = ?expected),
        err
    )]
    async fn update_session(
        &self,
        tx: &PgTx,
        session: &CashSession,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let s = session.snapshot();
        let closing = s.closing.as_ref();
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(to_i64("update_session", v)?),
        };
        let mut guard = tx.0.lock().await;

        let result = sqlx::query(
            r#"
            UPDATE cash_sessions SET
                status = $3,
                responsible_actor = $4,
                closed_by = $5,
                closed_at = $6,
                expected_usd = $7,
                expected_khr = $8,
                counted_usd = $9,
                counted_khr = $10,
                variance_usd = $11,
                variance_khr = $12,
                review_requested_by = $13,
                approved_by = $14,
                approved_at = $15,
                version = $16
            WHERE tenant_id = $1 AND id = $2
              AND ($17::BIGINT IS NULL OR version = $17)
            "#,
        )
        .bind(s.tenant_id.as_uuid())
        .bind(s.id.as_uuid())
        .bind(s.status.as_str())
        .bind(s.responsible_actor.as_uuid())
        .bind(closing.map(|c| uuid::Uuid::from(c.closed_by)))
        .bind(closing.map(|c| c.closed_at))
        .bind(closing.map(|c| c.expected_cash.usd))
        .bind(closing.map(|c| c.expected_cash.khr))
        .bind(closing.map(|c| c.counted_cash.usd))
        .bind(closing.map(|c| c.counted_cash.khr))
        .bind(closing.map(|c| c.variance.usd))
        .bind(closing.map(|c| c.variance.khr))
        .bind(s.review_requested_by.map(uuid::Uuid::from))
        .bind(s.approved_by.map(uuid::Uuid::from))
        .bind(s.approved_at)
        .bind(to_i64("update_session", s.version)?)
        .bind(expected_version)
        .execute(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("update_session", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "cash session {} changed concurrently (expected {expected:?})",
                s.id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, tx), fields(tenant_id = %tenant_id, session_id = %session_id, lock = ?lock, found = tracing::field::Empty), err)]
    async fn load_session(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        session_id: CashSessionId,
        lock: RowLock,
    ) -> Result<Option<CashSession>, StoreError> {
        let suffix = match lock {
            RowLock::None => "",
            RowLock::Share => "FOR SHARE",
            RowLock::Update => "FOR UPDATE",
        };
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM cash_sessions WHERE tenant_id = $1 AND id = $2 {suffix}"
        );

        let mut guard = tx.0.lock().await;
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(session_id.as_uuid())
            .fetch_all(conn(&mut guard)?)
            .await
            .map_err(|e| map_sqlx_error("load_session", e))?;

        let session = decode_all::<CashSessionRow, CashSession>("load_session", rows)?
            .into_iter()
            .next();
        Span::current().record("found", session.is_some());
        Ok(session)
    }

    async fn find_open_session(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        branch_id: BranchId,
        scope: SessionScope,
    ) -> Result<Option<CashSession>, StoreError> {
        let mut guard = tx.0.lock().await;
        let rows = match scope {
            SessionScope::Register(register_id) => {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM cash_sessions \
                     WHERE tenant_id = $1 AND register_id = $2 AND status = 'OPEN'"
                );
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(register_id.as_uuid())
                    .fetch_all(conn(&mut guard)?)
                    .await
            }
            SessionScope::Branch => {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM cash_sessions \
                     WHERE tenant_id = $1 AND branch_id = $2 AND register_id IS NULL \
                     AND status = 'OPEN'"
                );
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(branch_id.as_uuid())
                    .fetch_all(conn(&mut guard)?)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("find_open_session", e))?;

        Ok(decode_all::<CashSessionRow, CashSession>("find_open_session", rows)?
            .into_iter()
            .next())
    }

    async fn list_sessions(
        &self,
        tx: &PgTx,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<CashSession>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM cash_sessions \
             WHERE tenant_id = $1 AND branch_id = $2 ORDER BY opened_at DESC"
        );
        let mut guard = tx.0.lock().await;
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(branch_id.as_uuid())
            .fetch_all(conn(&mut guard)?)
            .await
            .map_err(|e| map_sqlx_error("list_sessions", e))?;

        decode_all::<CashSessionRow, _>("list_sessions", rows)
    }
}

#[async_trait]
impl AuditWriter<PgTx> for PgLedger {
    async fn write_audit(&self, tx: &PgTx, record: AuditRecord) -> Result<(), StoreError> {
        let details = serde_json::to_value(&record.action)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut guard = tx.0.lock().await;

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, tenant_id, branch_id, actor_id, action, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id.as_uuid())
        .bind(record.branch_id.as_uuid())
        .bind(record.actor_id.map(uuid::Uuid::from))
        .bind(record.action.name())
        .bind(details)
        .bind(record.created_at)
        .execute(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("write_audit", e))?;

        Ok(())
    }
}
