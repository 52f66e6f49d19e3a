use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use tallyline_cash::CashEvent;
use tallyline_core::TenantId;
use tallyline_events::{Event, EventCodec, EventCodecError};
use tallyline_inventory::InventoryEvent;

/// Everything that can sit in the outbox. Decoding routes on the type prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Inventory(InventoryEvent),
    Cash(CashEvent),
}

impl From<InventoryEvent> for DomainEvent {
    fn from(value: InventoryEvent) -> Self {
        DomainEvent::Inventory(value)
    }
}

impl From<CashEvent> for DomainEvent {
    fn from(value: CashEvent) -> Self {
        DomainEvent::Cash(value)
    }
}

impl DomainEvent {
    pub fn as_inventory(&self) -> Option<&InventoryEvent> {
        match self {
            DomainEvent::Inventory(e) => Some(e),
            DomainEvent::Cash(_) => None,
        }
    }

    pub fn as_cash(&self) -> Option<&CashEvent> {
        match self {
            DomainEvent::Cash(e) => Some(e),
            DomainEvent::Inventory(_) => None,
        }
    }
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::Inventory(e) => e.event_type(),
            DomainEvent::Cash(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            DomainEvent::Inventory(e) => e.version(),
            DomainEvent::Cash(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::Inventory(e) => e.occurred_at(),
            DomainEvent::Cash(e) => e.occurred_at(),
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            DomainEvent::Inventory(e) => e.tenant_id(),
            DomainEvent::Cash(e) => e.tenant_id(),
        }
    }
}

impl EventCodec for DomainEvent {
    fn encode(&self) -> Result<JsonValue, EventCodecError> {
        match self {
            DomainEvent::Inventory(e) => e.encode(),
            DomainEvent::Cash(e) => e.encode(),
        }
    }

    fn decode(event_type: &str, payload: &JsonValue) -> Result<Self, EventCodecError> {
        if event_type.starts_with("inventory.") {
            InventoryEvent::decode(event_type, payload).map(DomainEvent::Inventory)
        } else if event_type.starts_with("cash.") {
            CashEvent::decode(event_type, payload).map(DomainEvent::Cash)
        } else {
            Err(EventCodecError::Unknown {
                event_type: event_type.to_string(),
                version: tallyline_events::payload_version(event_type, payload).unwrap_or(0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tallyline_core::{BranchId, LedgerEntryId, StockItemId, UserId};
    use tallyline_inventory::StockMovedV1;

    #[test]
    fn routes_by_prefix() {
        let ev = DomainEvent::Inventory(InventoryEvent::StockReceived(StockMovedV1 {
            tenant_id: TenantId::new(),
            branch_id: BranchId::new(),
            entry_id: LedgerEntryId::new(),
            stock_item_id: StockItemId::new(),
            delta: Decimal::from(10),
            note: None,
            actor_id: Some(UserId::new()),
            occurred_at: Utc::now(),
        }));
        let json = ev.encode().unwrap();
        assert_eq!(DomainEvent::decode(ev.event_type(), &json).unwrap(), ev);
        assert!(DomainEvent::decode("sales.order_placed", &json).is_err());
    }
}
