use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tallyline_core::{
    BranchId, CashAmounts, CashMovementId, CashSessionId, RegisterId, SaleId, TenantId, UserId,
};
use tallyline_events::{
    Event, EventCodec, EventCodecError, decode_body, encode_payload, payload_version,
};

use crate::movement::{CashMovement, CashMovementStatus, CashMovementType};
use crate::session::CashSessionStatus;

pub const SESSION_OPENED: &str = "cash.session_opened";
pub const MOVEMENT_RECORDED: &str = "cash.movement_recorded";
pub const SESSION_TAKEN_OVER: &str = "cash.session_taken_over";
pub const SESSION_CLOSED: &str = "cash.session_closed";
pub const SESSION_REVIEW_REQUESTED: &str = "cash.session_review_requested";
pub const SESSION_APPROVED: &str = "cash.session_approved";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpenedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub register_id: Option<RegisterId>,
    pub opened_by: UserId,
    pub opening_float: CashAmounts,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRecordedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub movement_id: CashMovementId,
    pub movement_type: CashMovementType,
    pub status: CashMovementStatus,
    /// Signed per currency.
    pub amount: CashAmounts,
    pub ref_sale_id: Option<SaleId>,
    pub reason: Option<String>,
    pub actor_id: UserId,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl MovementRecordedV1 {
    pub fn from_movement(m: &CashMovement) -> Self {
        Self {
            tenant_id: m.tenant_id,
            branch_id: m.branch_id,
            session_id: m.session_id,
            movement_id: m.id,
            movement_type: m.movement_type,
            status: m.status,
            amount: m.amount,
            ref_sale_id: m.ref_sale_id,
            reason: m.reason.clone(),
            actor_id: m.actor_id,
            approved_by: m.approved_by,
            occurred_at: m.occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTakenOverV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub previous_actor: UserId,
    pub new_actor: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub closed_by: UserId,
    pub expected_cash: CashAmounts,
    pub counted_cash: CashAmounts,
    pub variance: CashAmounts,
    /// `CLOSED`, or `PENDING_REVIEW` when the variance was over threshold.
    pub status: CashSessionStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReviewRequestedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub requested_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionApprovedV1 {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub approved_by: UserId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Every cash event, one variant per `(type, v)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashEvent {
    SessionOpened(SessionOpenedV1),
    MovementRecorded(MovementRecordedV1),
    SessionTakenOver(SessionTakenOverV1),
    SessionClosed(SessionClosedV1),
    SessionReviewRequested(SessionReviewRequestedV1),
    SessionApproved(SessionApprovedV1),
}

impl CashEvent {
    pub fn session_id(&self) -> CashSessionId {
        match self {
            CashEvent::SessionOpened(e) => e.session_id,
            CashEvent::MovementRecorded(e) => e.session_id,
            CashEvent::SessionTakenOver(e) => e.session_id,
            CashEvent::SessionClosed(e) => e.session_id,
            CashEvent::SessionReviewRequested(e) => e.session_id,
            CashEvent::SessionApproved(e) => e.session_id,
        }
    }

    pub fn branch_id(&self) -> BranchId {
        match self {
            CashEvent::SessionOpened(e) => e.branch_id,
            CashEvent::MovementRecorded(e) => e.branch_id,
            CashEvent::SessionTakenOver(e) => e.branch_id,
            CashEvent::SessionClosed(e) => e.branch_id,
            CashEvent::SessionReviewRequested(e) => e.branch_id,
            CashEvent::SessionApproved(e) => e.branch_id,
        }
    }
}

impl Event for CashEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CashEvent::SessionOpened(_) => SESSION_OPENED,
            CashEvent::MovementRecorded(_) => MOVEMENT_RECORDED,
            CashEvent::SessionTakenOver(_) => SESSION_TAKEN_OVER,
            CashEvent::SessionClosed(_) => SESSION_CLOSED,
            CashEvent::SessionReviewRequested(_) => SESSION_REVIEW_REQUESTED,
            CashEvent::SessionApproved(_) => SESSION_APPROVED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CashEvent::SessionOpened(e) => e.occurred_at,
            CashEvent::MovementRecorded(e) => e.occurred_at,
            CashEvent::SessionTakenOver(e) => e.occurred_at,
            CashEvent::SessionClosed(e) => e.occurred_at,
            CashEvent::SessionReviewRequested(e) => e.occurred_at,
            CashEvent::SessionApproved(e) => e.occurred_at,
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            CashEvent::SessionOpened(e) => e.tenant_id,
            CashEvent::MovementRecorded(e) => e.tenant_id,
            CashEvent::SessionTakenOver(e) => e.tenant_id,
            CashEvent::SessionClosed(e) => e.tenant_id,
            CashEvent::SessionReviewRequested(e) => e.tenant_id,
            CashEvent::SessionApproved(e) => e.tenant_id,
        }
    }
}

impl EventCodec for CashEvent {
    fn encode(&self) -> Result<JsonValue, EventCodecError> {
        let (ty, v) = (self.event_type(), self.version());
        match self {
            CashEvent::SessionOpened(e) => encode_payload(ty, v, e),
            CashEvent::MovementRecorded(e) => encode_payload(ty, v, e),
            CashEvent::SessionTakenOver(e) => encode_payload(ty, v, e),
            CashEvent::SessionClosed(e) => encode_payload(ty, v, e),
            CashEvent::SessionReviewRequested(e) => encode_payload(ty, v, e),
            CashEvent::SessionApproved(e) => encode_payload(ty, v, e),
        }
    }

    fn decode(event_type: &str, payload: &JsonValue) -> Result<Self, EventCodecError> {
        let v = payload_version(event_type, payload)?;
        match (event_type, v) {
            (SESSION_OPENED, 1) => decode_body(event_type, v, payload).map(Self::SessionOpened),
            (MOVEMENT_RECORDED, 1) => {
                decode_body(event_type, v, payload).map(Self::MovementRecorded)
            }
            (SESSION_TAKEN_OVER, 1) => {
                decode_body(event_type, v, payload).map(Self::SessionTakenOver)
            }
            (SESSION_CLOSED, 1) => decode_body(event_type, v, payload).map(Self::SessionClosed),
            (SESSION_REVIEW_REQUESTED, 1) => {
                decode_body(event_type, v, payload).map(Self::SessionReviewRequested)
            }
            (SESSION_APPROVED, 1) => decode_body(event_type, v, payload).map(Self::SessionApproved),
            _ => Err(EventCodecError::Unknown {
                event_type: event_type.to_string(),
                version: v,
            }),
        }
    }
}
