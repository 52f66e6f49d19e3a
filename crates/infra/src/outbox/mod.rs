//! Transactional outbox.
//!
//! Events are written to the outbox with the caller's transaction handle, so
//! they commit (or vanish) together with the ledger write that produced them.
//! The dispatcher delivers them later, at least once.

pub mod dispatcher;
pub mod domain_event;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use tallyline_core::{OutboxId, TenantId};
use tallyline_events::EventCodec;

use crate::error::StoreError;

pub use dispatcher::{
    DispatchReport, DispatcherStats, OutboxDispatcher, OutboxDispatcherConfig,
    OutboxDispatcherHandle,
};
pub use domain_event::DomainEvent;

/// An outbox row. `sent_at` stays `None` until every subscriber accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub tenant_id: TenantId,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}

#[async_trait]
pub trait OutboxStore<Tx>: Send + Sync {
    async fn insert_record(&self, tx: &Tx, record: OutboxRecord) -> Result<(), StoreError>;

    /// Lock up to `limit` unsent rows, oldest first, skipping rows another
    /// transaction already holds. Locks are released at commit/rollback.
    async fn lock_unsent(&self, tx: &Tx, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn mark_sent(
        &self,
        tx: &Tx,
        id: OutboxId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Encode `event` and write it to the outbox inside the caller's transaction.
///
/// Never opens a transaction of its own.
pub async fn publish_via_outbox<Tx, E>(
    outbox: &dyn OutboxStore<Tx>,
    tx: &Tx,
    event: &E,
) -> Result<OutboxRecord, StoreError>
where
    Tx: Sync,
    E: EventCodec,
{
    let payload = event
        .encode()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let record = OutboxRecord {
        id: OutboxId::new(),
        tenant_id: event.tenant_id(),
        event_type: event.event_type().to_string(),
        payload,
        created_at: Utc::now(),
        sent_at: None,
    };
    outbox.insert_record(tx, record.clone()).await?;

    debug!(
        outbox_id = %record.id,
        tenant_id = %record.tenant_id,
        event_type = %record.event_type,
        "event written to outbox"
    );
    Ok(record)
}
