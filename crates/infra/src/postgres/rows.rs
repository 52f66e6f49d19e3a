//! Row mappings between tables and domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use tallyline_cash::{CashMovement, CashSession, CashSessionSnapshot, SessionClosing};
use tallyline_core::{CashAmounts, DomainError};
use tallyline_inventory::InventoryEntry;

use crate::error::StoreError;
use crate::outbox::OutboxRecord;

pub(super) const INVENTORY_COLUMNS: &str = "id, tenant_id, branch_id, stock_item_id, delta, reason, \
     ref_sale_id, note, actor_id, occurred_at, created_at";

pub(super) const MOVEMENT_COLUMNS: &str = "id, tenant_id, branch_id, register_id, session_id, \
     actor_id, type, status, amount_usd, amount_khr, ref_sale_id, reason, approved_by, \
     occurred_at, created_at";

pub(super) const SESSION_COLUMNS: &str = "id, tenant_id, branch_id, register_id, status, \
     opened_by, responsible_actor, opened_at, opening_float_usd, opening_float_khr, closed_by, \
     closed_at, expected_usd, expected_khr, counted_usd, counted_khr, variance_usd, variance_khr, \
     review_requested_by, approved_by, approved_at, version";

fn corrupt(e: DomainError) -> StoreError {
    StoreError::Serialization(format!("stored value rejected: {e}"))
}

fn amounts(usd: Decimal, khr: Decimal) -> CashAmounts {
    CashAmounts { usd, khr }
}

#[derive(Debug)]
pub(super) struct InventoryEntryRow {
    id: Uuid,
    tenant_id: Uuid,
    branch_id: Uuid,
    stock_item_id: Uuid,
    delta: Decimal,
    reason: String,
    ref_sale_id: Option<Uuid>,
    note: Option<String>,
    actor_id: Option<Uuid>,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InventoryEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryEntryRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            branch_id: row.try_get("branch_id")?,
            stock_item_id: row.try_get("stock_item_id")?,
            delta: row.try_get("delta")?,
            reason: row.try_get("reason")?,
            ref_sale_id: row.try_get("ref_sale_id")?,
            note: row.try_get("note")?,
            actor_id: row.try_get("actor_id")?,
            occurred_at: row.try_get("occurred_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<InventoryEntryRow> for InventoryEntry {
    type Error = StoreError;

    fn try_from(row: InventoryEntryRow) -> Result<Self, Self::Error> {
        Ok(InventoryEntry {
            id: row.id.into(),
            tenant_id: row.tenant_id.into(),
            branch_id: row.branch_id.into(),
            stock_item_id: row.stock_item_id.into(),
            delta: row.delta,
            reason: row.reason.parse().map_err(corrupt)?,
            ref_sale_id: row.ref_sale_id.map(Into::into),
            note: row.note,
            actor_id: row.actor_id.map(Into::into),
            occurred_at: row.occurred_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
pub(super) struct CashMovementRow {
    id: Uuid,
    tenant_id: Uuid,
    branch_id: Uuid,
    register_id: Option<Uuid>,
    session_id: Uuid,
    actor_id: Uuid,
    movement_type: String,
    status: String,
    amount_usd: Decimal,
    amount_khr: Decimal,
    ref_sale_id: Option<Uuid>,
    reason: Option<String>,
    approved_by: Option<Uuid>,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for CashMovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CashMovementRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            branch_id: row.try_get("branch_id")?,
            register_id: row.try_get("register_id")?,
            session_id: row.try_get("session_id")?,
            actor_id: row.try_get("actor_id")?,
            movement_type: row.try_get("type")?,
            status: row.try_get("status")?,
            amount_usd: row.try_get("amount_usd")?,
            amount_khr: row.try_get("amount_khr")?,
            ref_sale_id: row.try_get("ref_sale_id")?,
            reason: row.try_get("reason")?,
            approved_by: row.try_get("approved_by")?,
            occurred_at: row.try_get("occurred_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<CashMovementRow> for CashMovement {
    type Error = StoreError;

    fn try_from(row: CashMovementRow) -> Result<Self, Self::Error> {
        Ok(CashMovement {
            id: row.id.into(),
            tenant_id: row.tenant_id.into(),
            branch_id: row.branch_id.into(),
            register_id: row.register_id.map(Into::into),
            session_id: row.session_id.into(),
            actor_id: row.actor_id.into(),
            movement_type: row.movement_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            amount: amounts(row.amount_usd, row.amount_khr),
            ref_sale_id: row.ref_sale_id.map(Into::into),
            reason: row.reason,
            approved_by: row.approved_by.map(Into::into),
            occurred_at: row.occurred_at,
            created_at: row.created_at,
        })
    }
}

/// Closing columns are all set together, or all null while the session is open.
#[derive(Debug)]
struct ClosingColumns {
    closed_by: Option<Uuid>,
    closed_at: Option<DateTime<Utc>>,
    expected_usd: Option<Decimal>,
    expected_khr: Option<Decimal>,
    counted_usd: Option<Decimal>,
    counted_khr: Option<Decimal>,
    variance_usd: Option<Decimal>,
    variance_khr: Option<Decimal>,
}

impl ClosingColumns {
    fn into_closing(self) -> Option<SessionClosing> {
        Some(SessionClosing {
            closed_by: self.closed_by?.into(),
            closed_at: self.closed_at?,
            expected_cash: amounts(self.expected_usd?, self.expected_khr?),
            counted_cash: amounts(self.counted_usd?, self.counted_khr?),
            variance: amounts(self.variance_usd?, self.variance_khr?),
        })
    }
}

#[derive(Debug)]
pub(super) struct CashSessionRow {
    id: Uuid,
    tenant_id: Uuid,
    branch_id: Uuid,
    register_id: Option<Uuid>,
    status: String,
    opened_by: Uuid,
    responsible_actor: Uuid,
    opened_at: DateTime<Utc>,
    opening_float_usd: Decimal,
    opening_float_khr: Decimal,
    closing: ClosingColumns,
    review_requested_by: Option<Uuid>,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for CashSessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CashSessionRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            branch_id: row.try_get("branch_id")?,
            register_id: row.try_get("register_id")?,
            status: row.try_get("status")?,
            opened_by: row.try_get("opened_by")?,
            responsible_actor: row.try_get("responsible_actor")?,
            opened_at: row.try_get("opened_at")?,
            opening_float_usd: row.try_get("opening_float_usd")?,
            opening_float_khr: row.try_get("opening_float_khr")?,
            closing: ClosingColumns {
                closed_by: row.try_get("closed_by")?,
                closed_at: row.try_get("closed_at")?,
                expected_usd: row.try_get("expected_usd")?,
                expected_khr: row.try_get("expected_khr")?,
                counted_usd: row.try_get("counted_usd")?,
                counted_khr: row.try_get("counted_khr")?,
                variance_usd: row.try_get("variance_usd")?,
                variance_khr: row.try_get("variance_khr")?,
            },
            review_requested_by: row.try_get("review_requested_by")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<CashSessionRow> for CashSession {
    type Error = StoreError;

    fn try_from(row: CashSessionRow) -> Result<Self, Self::Error> {
        Ok(CashSession::restore(CashSessionSnapshot {
            id: row.id.into(),
            tenant_id: row.tenant_id.into(),
            branch_id: row.branch_id.into(),
            register_id: row.register_id.map(Into::into),
            status: row.status.parse().map_err(corrupt)?,
            opened_by: row.opened_by.into(),
            responsible_actor: row.responsible_actor.into(),
            opened_at: row.opened_at,
            opening_float: amounts(row.opening_float_usd, row.opening_float_khr),
            closing: row.closing.into_closing(),
            review_requested_by: row.review_requested_by.map(Into::into),
            approved_by: row.approved_by.map(Into::into),
            approved_at: row.approved_at,
            version: u64::try_from(row.version)
                .map_err(|_| StoreError::Serialization(format!("negative version {}", row.version)))?,
        }))
    }
}

#[derive(Debug)]
pub(super) struct OutboxRow {
    id: Uuid,
    tenant_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for OutboxRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            event_type: row.try_get("type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
        })
    }
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: row.id.into(),
            tenant_id: row.tenant_id.into(),
            event_type: row.event_type,
            payload: row.payload,
            created_at: row.created_at,
            sent_at: row.sent_at,
        }
    }
}

/// Decode every row, failing on the first bad one.
pub(super) fn decode_all<R, T>(operation: &str, rows: Vec<PgRow>) -> Result<Vec<T>, StoreError>
where
    R: for<'r> sqlx::FromRow<'r, PgRow>,
    T: TryFrom<R, Error = StoreError>,
{
    rows.iter()
        .map(|row| {
            let decoded = R::from_row(row).map_err(|e| super::map_sqlx_error(operation, e))?;
            T::try_from(decoded)
        })
        .collect()
}
