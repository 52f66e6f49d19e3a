//! Outbox table access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{Span, instrument};

use tallyline_core::OutboxId;

use super::rows::OutboxRow;
use super::{PgLedger, PgTx, conn, map_sqlx_error};
use crate::error::StoreError;
use crate::outbox::{OutboxRecord, OutboxStore};

#[async_trait]
impl OutboxStore<PgTx> for PgLedger {
    async fn insert_record(&self, tx: &PgTx, record: OutboxRecord) -> Result<(), StoreError> {
        let mut guard = tx.0.lock().await;
        sqlx::query(
            r#"
            INSERT INTO outbox (id, tenant_id, type, payload, created_at, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.tenant_id.as_uuid())
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.sent_at)
        .execute(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("insert_outbox_record", e))?;
        Ok(())
    }

    /// Rows stay locked until the dispatcher's transaction ends, so concurrent
    /// dispatchers never claim the same row.
    #[instrument(skip(self, tx), fields(claimed = tracing::field::Empty), err)]
    async fn lock_unsent(&self, tx: &PgTx, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let limit = i64::try_from(limit)
            .map_err(|_| StoreError::Serialization(format!("batch size {limit} out of range")))?;
        let mut guard = tx.0.lock().await;

        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, type, payload, created_at, sent_at
            FROM outbox
            WHERE sent_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("lock_unsent", e))?;

        let records = rows
            .iter()
            .map(|row| OutboxRow::from_row(row).map(OutboxRecord::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("lock_unsent", e))?;

        Span::current().record("claimed", records.len());
        Ok(records)
    }

    async fn mark_sent(
        &self,
        tx: &PgTx,
        id: OutboxId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = tx.0.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE outbox SET sent_at = COALESCE(sent_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(sent_at)
        .execute(conn(&mut guard)?)
        .await
        .map_err(|e| map_sqlx_error("mark_sent", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("outbox row {id}")));
        }
        Ok(())
    }
}
