use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tallyline_core::{BranchId, LedgerEntryId, SaleId, StockItemId, TenantId, UserId};
use tallyline_events::{
    Event, EventCodec, EventCodecError, decode_body, encode_payload, payload_version,
};

use crate::journal::{InventoryEntry, InventoryReason};
use crate::movement::SaleMovement;

pub const STOCK_RECEIVED: &str = "inventory.stock_received";
pub const STOCK_WASTED: &str = "inventory.stock_wasted";
pub const STOCK_CORRECTED: &str = "inventory.stock_corrected";
pub const SALE_DEDUCTED: &str = "inventory.sale_deducted";
pub const SALE_VOIDED: &str = "inventory.sale_voided";
pub const SALE_REOPENED: &str = "inventory.sale_reopened";

/// Payload v1 for single-entry movements (received / wasted / corrected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub entry_id: LedgerEntryId,
    pub stock_item_id: StockItemId,
    pub delta: Decimal,
    pub note: Option<String>,
    pub actor_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// One line of a sale-linked movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleLineMovedV1 {
    pub entry_id: LedgerEntryId,
    pub stock_item_id: StockItemId,
    pub delta: Decimal,
}

/// Payload v1 for sale-linked movements: one consolidated event per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleStockMovedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub sale_id: SaleId,
    pub lines: Vec<SaleLineMovedV1>,
    pub actor_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    StockReceived(StockMovedV1),
    StockWasted(StockMovedV1),
    StockCorrected(StockMovedV1),
    SaleDeducted(SaleStockMovedV1),
    SaleVoided(SaleStockMovedV1),
    SaleReopened(SaleStockMovedV1),
}

impl InventoryEvent {
    /// Build the event describing a single stored entry.
    pub fn for_entry(entry: &InventoryEntry) -> Option<Self> {
        let body = StockMovedV1 {
            tenant_id: entry.tenant_id,
            branch_id: entry.branch_id,
            entry_id: entry.id,
            stock_item_id: entry.stock_item_id,
            delta: entry.delta,
            note: entry.note.clone(),
            actor_id: entry.actor_id,
            occurred_at: entry.occurred_at,
        };
        match entry.reason {
            InventoryReason::Receive => Some(InventoryEvent::StockReceived(body)),
            InventoryReason::Waste => Some(InventoryEvent::StockWasted(body)),
            InventoryReason::Correction => Some(InventoryEvent::StockCorrected(body)),
            InventoryReason::Sale | InventoryReason::Void | InventoryReason::Reopen => None,
        }
    }

    /// Build the consolidated event for the stored lines of one sale movement.
    pub fn for_sale(
        kind: SaleMovement,
        tenant_id: TenantId,
        branch_id: BranchId,
        sale_id: SaleId,
        actor_id: Option<UserId>,
        occurred_at: DateTime<Utc>,
        entries: &[InventoryEntry],
    ) -> Self {
        let body = SaleStockMovedV1 {
            tenant_id,
            branch_id,
            sale_id,
            lines: entries
                .iter()
                .map(|e| SaleLineMovedV1 {
                    entry_id: e.id,
                    stock_item_id: e.stock_item_id,
                    delta: e.delta,
                })
                .collect(),
            actor_id,
            occurred_at,
        };
        match kind {
            SaleMovement::Deduct => InventoryEvent::SaleDeducted(body),
            SaleMovement::Void => InventoryEvent::SaleVoided(body),
            SaleMovement::Reopen => InventoryEvent::SaleReopened(body),
        }
    }

    pub fn branch_id(&self) -> BranchId {
        match self {
            InventoryEvent::StockReceived(e)
            | InventoryEvent::StockWasted(e)
            | InventoryEvent::StockCorrected(e) => e.branch_id,
            InventoryEvent::SaleDeducted(e)
            | InventoryEvent::SaleVoided(e)
            | InventoryEvent::SaleReopened(e) => e.branch_id,
        }
    }

    /// Stock items whose on-hand changed.
    pub fn stock_item_ids(&self) -> Vec<StockItemId> {
        match self {
            InventoryEvent::StockReceived(e)
            | InventoryEvent::StockWasted(e)
            | InventoryEvent::StockCorrected(e) => vec![e.stock_item_id],
            InventoryEvent::SaleDeducted(e)
            | InventoryEvent::SaleVoided(e)
            | InventoryEvent::SaleReopened(e) => e.lines.iter().map(|l| l.stock_item_id).collect(),
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockReceived(_) => STOCK_RECEIVED,
            InventoryEvent::StockWasted(_) => STOCK_WASTED,
            InventoryEvent::StockCorrected(_) => STOCK_CORRECTED,
            InventoryEvent::SaleDeducted(_) => SALE_DEDUCTED,
            InventoryEvent::SaleVoided(_) => SALE_VOIDED,
            InventoryEvent::SaleReopened(_) => SALE_REOPENED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::StockReceived(e)
            | InventoryEvent::StockWasted(e)
            | InventoryEvent::StockCorrected(e) => e.occurred_at,
            InventoryEvent::SaleDeducted(e)
            | InventoryEvent::SaleVoided(e)
            | InventoryEvent::SaleReopened(e) => e.occurred_at,
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            InventoryEvent::StockReceived(e)
            | InventoryEvent::StockWasted(e)
            | InventoryEvent::StockCorrected(e) => e.tenant_id,
            InventoryEvent::SaleDeducted(e)
            | InventoryEvent::SaleVoided(e)
            | InventoryEvent::SaleReopened(e) => e.tenant_id,
        }
    }
}

impl EventCodec for InventoryEvent {
    fn encode(&self) -> Result<JsonValue, EventCodecError> {
        let (ty, v) = (self.event_type(), self.version());
        match self {
            InventoryEvent::StockReceived(e)
            | InventoryEvent::StockWasted(e)
            | InventoryEvent::StockCorrected(e) => encode_payload(ty, v, e),
            InventoryEvent::SaleDeducted(e)
            | InventoryEvent::SaleVoided(e)
            | InventoryEvent::SaleReopened(e) => encode_payload(ty, v, e),
        }
    }

    fn decode(event_type: &str, payload: &JsonValue) -> Result<Self, EventCodecError> {
        let v = payload_version(event_type, payload)?;
        match (event_type, v) {
            (STOCK_RECEIVED, 1) => decode_body(event_type, v, payload).map(Self::StockReceived),
            (STOCK_WASTED, 1) => decode_body(event_type, v, payload).map(Self::StockWasted),
            (STOCK_CORRECTED, 1) => decode_body(event_type, v, payload).map(Self::StockCorrected),
            (SALE_DEDUCTED, 1) => decode_body(event_type, v, payload).map(Self::SaleDeducted),
            (SALE_VOIDED, 1) => decode_body(event_type, v, payload).map(Self::SaleVoided),
            (SALE_REOPENED, 1) => decode_body(event_type, v, payload).map(Self::SaleReopened),
            _ => Err(EventCodecError::Unknown {
                event_type: event_type.to_string(),
                version: v,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrected() -> InventoryEvent {
        InventoryEvent::StockCorrected(StockMovedV1 {
            tenant_id: TenantId::new(),
            branch_id: BranchId::new(),
            entry_id: LedgerEntryId::new(),
            stock_item_id: StockItemId::new(),
            delta: Decimal::from(-2),
            note: Some("recount".into()),
            actor_id: Some(UserId::new()),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn payload_carries_type_version_and_figures() {
        let ev = corrected();
        let json = ev.encode().unwrap();
        assert_eq!(json["type"], STOCK_CORRECTED);
        assert_eq!(json["v"], 1);
        assert_eq!(json["delta"], "-2");
        assert!(json["occurredAt"].as_str().unwrap().contains('T'));

        let back = InventoryEvent::decode(STOCK_CORRECTED, &json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn extra_fields_do_not_break_v1() {
        let mut json = corrected().encode().unwrap();
        json["reasonCode"] = JsonValue::from("cycle_count");
        assert!(InventoryEvent::decode(STOCK_CORRECTED, &json).is_ok());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut json = corrected().encode().unwrap();
        json["v"] = JsonValue::from(2);
        assert_eq!(
            InventoryEvent::decode(STOCK_CORRECTED, &json).unwrap_err(),
            EventCodecError::Unknown {
                event_type: STOCK_CORRECTED.to_string(),
                version: 2
            }
        );
    }
}
