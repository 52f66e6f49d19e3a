use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyline_core::{OutboxId, TenantId};

/// Envelope for a delivered event, carrying the outbox metadata.
///
/// This is the unit handed to subscribers by the outbox dispatcher.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - `outbox_id` is stable across redeliveries; subscribers that need to
///   deduplicate can key on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    outbox_id: OutboxId,
    tenant_id: TenantId,
    event_type: String,
    version: u32,
    created_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        outbox_id: OutboxId,
        tenant_id: TenantId,
        event_type: impl Into<String>,
        version: u32,
        created_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            outbox_id,
            tenant_id,
            event_type: event_type.into(),
            version,
            created_at,
            payload,
        }
    }

    pub fn outbox_id(&self) -> OutboxId {
        self.outbox_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
