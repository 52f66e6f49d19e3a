//! Cash movements: the signed entries of a session's drawer ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyline_core::{
    BranchId, CashAmounts, CashMovementId, CashSessionId, DomainError, DomainResult, Entity,
    RegisterId, SaleId, TenantId, UserId, ValidationReason,
};

use crate::policy::CashSessionPolicies;
use crate::session::CashSession;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashMovementType {
    SaleCash,
    RefundCash,
    PaidIn,
    PaidOut,
    Adjustment,
}

/// Sign a movement type imposes on the drawer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
    /// Signed by the caller (adjustments).
    Either,
}

impl CashMovementType {
    pub fn direction(self) -> Direction {
        match self {
            CashMovementType::SaleCash | CashMovementType::PaidIn => Direction::Increase,
            CashMovementType::RefundCash | CashMovementType::PaidOut => Direction::Decrease,
            CashMovementType::Adjustment => Direction::Either,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CashMovementType::SaleCash => "SALE_CASH",
            CashMovementType::RefundCash => "REFUND_CASH",
            CashMovementType::PaidIn => "PAID_IN",
            CashMovementType::PaidOut => "PAID_OUT",
            CashMovementType::Adjustment => "ADJUSTMENT",
        }
    }
}

impl core::fmt::Display for CashMovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CashMovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            CashMovementType::SaleCash,
            CashMovementType::RefundCash,
            CashMovementType::PaidIn,
            CashMovementType::PaidOut,
            CashMovementType::Adjustment,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
        .ok_or_else(|| DomainError::invariant(format!("unknown cash movement type '{s}'")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashMovementStatus {
    Recorded,
    /// A manager signed off on the movement (refunds under approval policy).
    ManagerApproved,
}

impl CashMovementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CashMovementStatus::Recorded => "RECORDED",
            CashMovementStatus::ManagerApproved => "MANAGER_APPROVED",
        }
    }
}

impl core::str::FromStr for CashMovementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECORDED" => Ok(CashMovementStatus::Recorded),
            "MANAGER_APPROVED" => Ok(CashMovementStatus::ManagerApproved),
            other => Err(DomainError::invariant(format!(
                "unknown cash movement status '{other}'"
            ))),
        }
    }
}

/// Command: RecordCashMovement.
///
/// `amount` is a magnitude for fixed-sign types and a signed figure for
/// adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCashMovement {
    pub tenant_id: TenantId,
    pub session_id: CashSessionId,
    pub movement_type: CashMovementType,
    pub amount: CashAmounts,
    pub actor_id: UserId,
    pub ref_sale_id: Option<SaleId>,
    pub reason: Option<String>,
    /// Manager who approved a refund, when approval is required.
    pub approved_by: Option<UserId>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A cash movement not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCashMovement {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub register_id: Option<RegisterId>,
    pub session_id: CashSessionId,
    pub actor_id: UserId,
    pub movement_type: CashMovementType,
    pub status: CashMovementStatus,
    pub amount: CashAmounts,
    pub ref_sale_id: Option<SaleId>,
    pub reason: Option<String>,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// A stored cash movement. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMovement {
    pub id: CashMovementId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub register_id: Option<RegisterId>,
    pub session_id: CashSessionId,
    pub actor_id: UserId,
    pub movement_type: CashMovementType,
    pub status: CashMovementStatus,
    pub amount: CashAmounts,
    pub ref_sale_id: Option<SaleId>,
    pub reason: Option<String>,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CashMovement {
    pub fn from_new(new: NewCashMovement, id: CashMovementId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id: new.tenant_id,
            branch_id: new.branch_id,
            register_id: new.register_id,
            session_id: new.session_id,
            actor_id: new.actor_id,
            movement_type: new.movement_type,
            status: new.status,
            amount: new.amount,
            ref_sale_id: new.ref_sale_id,
            reason: new.reason,
            approved_by: new.approved_by,
            occurred_at: new.occurred_at,
            created_at,
        }
    }
}

impl Entity for CashMovement {
    type Id = CashMovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn denied(msg: impl Into<String>) -> DomainError {
    DomainError::validation(ValidationReason::PolicyDenied, msg)
}

/// Validate a movement against its session and the tenant's policies, and
/// produce the signed entry to append.
pub fn plan_movement(
    session: &CashSession,
    cmd: &RecordCashMovement,
    policies: &CashSessionPolicies,
    now: DateTime<Utc>,
) -> DomainResult<NewCashMovement> {
    if session.tenant_id() != cmd.tenant_id || *session.id_typed() != cmd.session_id {
        return Err(DomainError::not_found(format!("cash session {}", cmd.session_id)));
    }
    session.ensure_open()?;

    let amount = match cmd.movement_type.direction() {
        Direction::Increase => {
            cmd.amount.ensure_positive("amount")?;
            cmd.amount
        }
        Direction::Decrease => {
            cmd.amount.ensure_positive("amount")?;
            -cmd.amount
        }
        Direction::Either => {
            cmd.amount.ensure_representable()?;
            if cmd.amount.is_zero() {
                return Err(DomainError::validation(
                    ValidationReason::ZeroDelta,
                    "adjustment amount cannot be zero",
                ));
            }
            cmd.amount
        }
    };

    let mut status = CashMovementStatus::Recorded;
    match cmd.movement_type {
        CashMovementType::PaidOut => {
            if !policies.allow_paid_out {
                return Err(denied("paid-outs are disabled for this tenant"));
            }
            if let Some(limit) = &policies.paid_out_limit {
                if cmd.amount.exceeds(limit) {
                    return Err(denied(format!(
                        "paid-out exceeds limit (usd {}, khr {})",
                        limit.usd, limit.khr
                    )));
                }
            }
        }
        CashMovementType::Adjustment if !policies.allow_manual_adjustment => {
            return Err(denied("manual adjustments are disabled for this tenant"));
        }
        CashMovementType::RefundCash if policies.require_refund_approval => {
            if cmd.approved_by.is_none() {
                return Err(denied("cash refunds require manager approval"));
            }
            status = CashMovementStatus::ManagerApproved;
        }
        _ => {}
    }

    Ok(NewCashMovement {
        tenant_id: cmd.tenant_id,
        branch_id: session.branch_id(),
        register_id: session.scope().register_id(),
        session_id: cmd.session_id,
        actor_id: cmd.actor_id,
        movement_type: cmd.movement_type,
        status,
        amount,
        ref_sale_id: cmd.ref_sale_id,
        reason: cmd
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        approved_by: cmd.approved_by,
        occurred_at: cmd.occurred_at.unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{OpenSession, SessionScope};
    use rust_decimal::Decimal;

    fn open_session() -> CashSession {
        let (session, _) = CashSession::open(
            &OpenSession {
                tenant_id: TenantId::new(),
                branch_id: BranchId::new(),
                session_id: CashSessionId::new(),
                scope: SessionScope::Register(RegisterId::new()),
                opened_by: UserId::new(),
                opening_float: CashAmounts::usd(Decimal::from(100)),
                occurred_at: None,
            },
            Utc::now(),
        )
        .unwrap();
        session
    }

    fn cmd(session: &CashSession, ty: CashMovementType, usd: Decimal) -> RecordCashMovement {
        RecordCashMovement {
            tenant_id: session.tenant_id(),
            session_id: *session.id_typed(),
            movement_type: ty,
            amount: CashAmounts::usd(usd),
            actor_id: UserId::new(),
            ref_sale_id: None,
            reason: None,
            approved_by: None,
            occurred_at: None,
        }
    }

    #[test]
    fn types_carry_their_sign() {
        let s = open_session();
        let p = CashSessionPolicies::default();
        let now = Utc::now();

        let paid_in = plan_movement(&s, &cmd(&s, CashMovementType::PaidIn, Decimal::from(50)), &p, now)
            .unwrap();
        assert_eq!(paid_in.amount.usd, Decimal::from(50));

        let paid_out =
            plan_movement(&s, &cmd(&s, CashMovementType::PaidOut, Decimal::from(20)), &p, now)
                .unwrap();
        assert_eq!(paid_out.amount.usd, Decimal::from(-20));
        assert_eq!(paid_out.register_id, s.scope().register_id());
    }

    #[test]
    fn negative_magnitude_is_rejected() {
        let s = open_session();
        let err = plan_movement(
            &s,
            &cmd(&s, CashMovementType::PaidIn, Decimal::from(-5)),
            &CashSessionPolicies::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.validation_reason(), Some(ValidationReason::InvalidAmount));
    }

    #[test]
    fn refund_needs_approver_by_default() {
        let s = open_session();
        let p = CashSessionPolicies::default();
        let mut refund = cmd(&s, CashMovementType::RefundCash, Decimal::from(5));

        let err = plan_movement(&s, &refund, &p, Utc::now()).unwrap_err();
        assert_eq!(err.validation_reason(), Some(ValidationReason::PolicyDenied));

        refund.approved_by = Some(UserId::new());
        let planned = plan_movement(&s, &refund, &p, Utc::now()).unwrap();
        assert_eq!(planned.status, CashMovementStatus::ManagerApproved);
        assert_eq!(planned.amount.usd, Decimal::from(-5));
    }

    #[test]
    fn paid_out_limit_and_switch() {
        let s = open_session();
        let limited = CashSessionPolicies::default().with_paid_out_limit(CashAmounts::usd(Decimal::from(10)));
        let over = cmd(&s, CashMovementType::PaidOut, Decimal::from(11));
        assert!(plan_movement(&s, &over, &limited, Utc::now()).is_err());

        let off = CashSessionPolicies {
            allow_paid_out: false,
            ..CashSessionPolicies::default()
        };
        let small = cmd(&s, CashMovementType::PaidOut, Decimal::ONE);
        assert!(plan_movement(&s, &small, &off, Utc::now()).is_err());
    }

    #[test]
    fn adjustments_are_signed_and_gated() {
        let s = open_session();
        let adj = cmd(&s, CashMovementType::Adjustment, Decimal::new(-150, 2));

        assert!(plan_movement(&s, &adj, &CashSessionPolicies::default(), Utc::now()).is_err());

        let allowed = CashSessionPolicies::default().allowing_adjustments();
        let planned = plan_movement(&s, &adj, &allowed, Utc::now()).unwrap();
        assert_eq!(planned.amount.usd, Decimal::new(-150, 2));

        let zero = cmd(&s, CashMovementType::Adjustment, Decimal::ZERO);
        let err = plan_movement(&s, &zero, &allowed, Utc::now()).unwrap_err();
        assert_eq!(err.validation_reason(), Some(ValidationReason::ZeroDelta));
    }

    #[test]
    fn other_tenant_cannot_see_session() {
        let s = open_session();
        let mut c = cmd(&s, CashMovementType::PaidIn, Decimal::ONE);
        c.tenant_id = TenantId::new();
        let err = plan_movement(&s, &c, &CashSessionPolicies::default(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
