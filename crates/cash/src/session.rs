//! Cash session aggregate.
//!
//! ```text
//! open() ──▶ OPEN ──close()──▶ CLOSED ──request_review()──▶ PENDING_REVIEW ──approve()──▶ APPROVED
//!             │                  ▲                               ▲
//!             └─ take_over()     └──── variance within threshold │
//!                                      variance over threshold ──┘
//! ```
//!
//! Movements are not part of the aggregate's state: they live in the cash
//! ledger and only require the session to be `OPEN`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyline_core::{
    Aggregate, AggregateRoot, BranchId, CashAmounts, CashSessionId, DomainError, DomainResult,
    RegisterId, TenantId, UserId, ValidationReason,
};

use crate::event::{
    CashEvent, SessionApprovedV1, SessionClosedV1, SessionOpenedV1, SessionReviewRequestedV1,
    SessionTakenOverV1,
};
use crate::policy::CashSessionPolicies;
use crate::totals::SessionTotals;

/// Where a session is anchored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// Device-agnostic: one open session per branch.
    Branch,
    /// One open session per register.
    Register(RegisterId),
}

impl SessionScope {
    pub fn register_id(&self) -> Option<RegisterId> {
        match self {
            SessionScope::Branch => None,
            SessionScope::Register(r) => Some(*r),
        }
    }

    pub fn from_register(register_id: Option<RegisterId>) -> Self {
        register_id.map_or(SessionScope::Branch, SessionScope::Register)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashSessionStatus {
    Open,
    Closed,
    PendingReview,
    Approved,
}

impl CashSessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CashSessionStatus::Open => "OPEN",
            CashSessionStatus::Closed => "CLOSED",
            CashSessionStatus::PendingReview => "PENDING_REVIEW",
            CashSessionStatus::Approved => "APPROVED",
        }
    }
}

impl core::fmt::Display for CashSessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CashSessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(CashSessionStatus::Open),
            "CLOSED" => Ok(CashSessionStatus::Closed),
            "PENDING_REVIEW" => Ok(CashSessionStatus::PendingReview),
            "APPROVED" => Ok(CashSessionStatus::Approved),
            other => Err(DomainError::invariant(format!(
                "unknown cash session status '{other}'"
            ))),
        }
    }
}

/// Figures fixed at close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosing {
    pub closed_by: UserId,
    pub closed_at: DateTime<Utc>,
    pub expected_cash: CashAmounts,
    pub counted_cash: CashAmounts,
    pub variance: CashAmounts,
}

/// Plain persisted form of a session (one row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSessionSnapshot {
    pub id: CashSessionId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub register_id: Option<RegisterId>,
    pub status: CashSessionStatus,
    pub opened_by: UserId,
    pub responsible_actor: UserId,
    pub opened_at: DateTime<Utc>,
    pub opening_float: CashAmounts,
    pub closing: Option<SessionClosing>,
    pub review_requested_by: Option<UserId>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Command: OpenSession (creates the aggregate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub session_id: CashSessionId,
    pub scope: SessionScope,
    pub opened_by: UserId,
    pub opening_float: CashAmounts,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeOverSession {
    pub new_actor: UserId,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Command: CloseSession. `totals` are aggregated from the ledger by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSession {
    pub closed_by: UserId,
    pub counted_cash: CashAmounts,
    pub totals: SessionTotals,
    pub policies: CashSessionPolicies,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReview {
    pub requested_by: UserId,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveSession {
    pub approved_by: UserId,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    TakeOver(TakeOverSession),
    Close(CloseSession),
    RequestReview(RequestReview),
    Approve(ApproveSession),
}

/// Aggregate root: CashSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashSession {
    id: CashSessionId,
    tenant_id: TenantId,
    branch_id: BranchId,
    scope: SessionScope,
    status: CashSessionStatus,
    opened_by: UserId,
    responsible_actor: UserId,
    opened_at: DateTime<Utc>,
    opening_float: CashAmounts,
    closing: Option<SessionClosing>,
    review_requested_by: Option<UserId>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    version: u64,
}

impl CashSession {
    /// Validate an open request and produce the new session with its event.
    ///
    /// Uniqueness of the open slot is not checked here; storage enforces it.
    pub fn open(cmd: &OpenSession, now: DateTime<Utc>) -> DomainResult<(Self, CashEvent)> {
        cmd.opening_float.ensure_representable()?;
        if cmd.opening_float.is_negative_anywhere() {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                "opening float cannot be negative",
            ));
        }

        let opened = SessionOpenedV1 {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            session_id: cmd.session_id,
            register_id: cmd.scope.register_id(),
            opened_by: cmd.opened_by,
            opening_float: cmd.opening_float,
            occurred_at: cmd.occurred_at.unwrap_or(now),
        };
        let mut session = Self::from_opened(&opened);
        let event = CashEvent::SessionOpened(opened);
        session.apply(&event);
        Ok((session, event))
    }

    fn from_opened(e: &SessionOpenedV1) -> Self {
        Self {
            id: e.session_id,
            tenant_id: e.tenant_id,
            branch_id: e.branch_id,
            scope: SessionScope::from_register(e.register_id),
            status: CashSessionStatus::Open,
            opened_by: e.opened_by,
            responsible_actor: e.opened_by,
            opened_at: e.occurred_at,
            opening_float: e.opening_float,
            closing: None,
            review_requested_by: None,
            approved_by: None,
            approved_at: None,
            version: 0,
        }
    }

    pub fn restore(s: CashSessionSnapshot) -> Self {
        Self {
            id: s.id,
            tenant_id: s.tenant_id,
            branch_id: s.branch_id,
            scope: SessionScope::from_register(s.register_id),
            status: s.status,
            opened_by: s.opened_by,
            responsible_actor: s.responsible_actor,
            opened_at: s.opened_at,
            opening_float: s.opening_float,
            closing: s.closing,
            review_requested_by: s.review_requested_by,
            approved_by: s.approved_by,
            approved_at: s.approved_at,
            version: s.version,
        }
    }

    pub fn snapshot(&self) -> CashSessionSnapshot {
        CashSessionSnapshot {
            id: self.id,
            tenant_id: self.tenant_id,
            branch_id: self.branch_id,
            register_id: self.scope.register_id(),
            status: self.status,
            opened_by: self.opened_by,
            responsible_actor: self.responsible_actor,
            opened_at: self.opened_at,
            opening_float: self.opening_float,
            closing: self.closing.clone(),
            review_requested_by: self.review_requested_by,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> &CashSessionId {
        &self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn scope(&self) -> SessionScope {
        self.scope
    }

    pub fn status(&self) -> CashSessionStatus {
        self.status
    }

    pub fn opened_by(&self) -> UserId {
        self.opened_by
    }

    pub fn responsible_actor(&self) -> UserId {
        self.responsible_actor
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn opening_float(&self) -> CashAmounts {
        self.opening_float
    }

    pub fn closing(&self) -> Option<&SessionClosing> {
        self.closing.as_ref()
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn is_open(&self) -> bool {
        self.status == CashSessionStatus::Open
    }

    /// Two open sessions may not share a register, nor (when device-agnostic) a branch.
    pub fn occupies_same_slot(&self, other: &CashSession) -> bool {
        self.tenant_id == other.tenant_id
            && match (self.scope, other.scope) {
                (SessionScope::Register(a), SessionScope::Register(b)) => a == b,
                (SessionScope::Branch, SessionScope::Branch) => self.branch_id == other.branch_id,
                _ => false,
            }
    }

    pub fn ensure_open(&self) -> DomainResult<()> {
        if !self.is_open() {
            return Err(DomainError::validation(
                ValidationReason::SessionNotOpen,
                format!("cash session {} is {}", self.id, self.status),
            ));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: CashSessionStatus, action: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::validation(
                ValidationReason::InvalidTransition,
                format!(
                    "cannot {action} cash session {} in status {} (requires {expected})",
                    self.id, self.status
                ),
            ));
        }
        Ok(())
    }

    fn handle_take_over(&self, cmd: &TakeOverSession) -> DomainResult<Vec<CashEvent>> {
        self.ensure_open()?;
        if cmd.new_actor == self.responsible_actor {
            return Err(DomainError::validation(
                ValidationReason::InvalidTransition,
                "actor is already responsible for this session",
            ));
        }
        Ok(vec![CashEvent::SessionTakenOver(SessionTakenOverV1 {
            tenant_id: self.tenant_id,
            branch_id: self.branch_id,
            session_id: self.id,
            previous_actor: self.responsible_actor,
            new_actor: cmd.new_actor,
            reason: cmd.reason.clone(),
            occurred_at: cmd.at,
        })])
    }

    fn handle_close(&self, cmd: &CloseSession) -> DomainResult<Vec<CashEvent>> {
        self.ensure_open()?;
        cmd.counted_cash.ensure_representable()?;
        if cmd.counted_cash.is_negative_anywhere() {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                "counted cash cannot be negative",
            ));
        }
        if cmd.totals.opening_float != self.opening_float {
            return Err(DomainError::invariant(
                "session totals were computed against a different opening float",
            ));
        }

        let variance = cmd.totals.variance(&cmd.counted_cash)?;
        let status = if cmd.policies.variance_needs_review(&variance) {
            CashSessionStatus::PendingReview
        } else {
            CashSessionStatus::Closed
        };

        Ok(vec![CashEvent::SessionClosed(SessionClosedV1 {
            tenant_id: self.tenant_id,
            branch_id: self.branch_id,
            session_id: self.id,
            closed_by: cmd.closed_by,
            expected_cash: cmd.totals.expected_cash,
            counted_cash: cmd.counted_cash,
            variance,
            status,
            occurred_at: cmd.at,
        })])
    }

    fn handle_request_review(&self, cmd: &RequestReview) -> DomainResult<Vec<CashEvent>> {
        self.ensure_status(CashSessionStatus::Closed, "request review of")?;
        Ok(vec![CashEvent::SessionReviewRequested(SessionReviewRequestedV1 {
            tenant_id: self.tenant_id,
            branch_id: self.branch_id,
            session_id: self.id,
            requested_by: cmd.requested_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveSession) -> DomainResult<Vec<CashEvent>> {
        self.ensure_status(CashSessionStatus::PendingReview, "approve")?;
        Ok(vec![CashEvent::SessionApproved(SessionApprovedV1 {
            tenant_id: self.tenant_id,
            branch_id: self.branch_id,
            session_id: self.id,
            approved_by: cmd.approved_by,
            note: cmd.note.clone(),
            occurred_at: cmd.at,
        })])
    }
}

impl AggregateRoot for CashSession {
    type Id = CashSessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for CashSession {
    type Command = SessionCommand;
    type Event = CashEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CashEvent::SessionOpened(e) => {
                let version = self.version;
                *self = Self::from_opened(e);
                self.version = version;
            }
            // Movements are ledger entries; they do not version the session row.
            CashEvent::MovementRecorded(_) => return,
            CashEvent::SessionTakenOver(e) => {
                self.responsible_actor = e.new_actor;
            }
            CashEvent::SessionClosed(e) => {
                self.status = e.status;
                self.closing = Some(SessionClosing {
                    closed_by: e.closed_by,
                    closed_at: e.occurred_at,
                    expected_cash: e.expected_cash,
                    counted_cash: e.counted_cash,
                    variance: e.variance,
                });
            }
            CashEvent::SessionReviewRequested(e) => {
                self.status = CashSessionStatus::PendingReview;
                self.review_requested_by = Some(e.requested_by);
            }
            CashEvent::SessionApproved(e) => {
                self.status = CashSessionStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SessionCommand::TakeOver(cmd) => self.handle_take_over(cmd),
            SessionCommand::Close(cmd) => self.handle_close(cmd),
            SessionCommand::RequestReview(cmd) => self.handle_request_review(cmd),
            SessionCommand::Approve(cmd) => self.handle_approve(cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tallyline_core::aggregate::execute;

    fn usd(cents: i64) -> CashAmounts {
        CashAmounts::usd(Decimal::new(cents, 2))
    }

    fn open(scope: SessionScope) -> CashSession {
        CashSession::open(
            &OpenSession {
                tenant_id: TenantId::new(),
                branch_id: BranchId::new(),
                session_id: CashSessionId::new(),
                scope,
                opened_by: UserId::new(),
                opening_float: usd(10000),
                occurred_at: None,
            },
            Utc::now(),
        )
        .unwrap()
        .0
    }

    fn close_cmd(session: &CashSession, counted: CashAmounts, policies: CashSessionPolicies) -> SessionCommand {
        SessionCommand::Close(CloseSession {
            closed_by: UserId::new(),
            counted_cash: counted,
            totals: SessionTotals::from_amounts(session.opening_float(), [usd(5000), usd(-2000)]).unwrap(),
            policies,
            at: Utc::now(),
        })
    }

    #[test]
    fn open_starts_at_version_one() {
        let s = open(SessionScope::Branch);
        assert_eq!(s.status(), CashSessionStatus::Open);
        assert_eq!(s.version(), 1);
        assert_eq!(s.responsible_actor(), s.opened_by());
    }

    #[test]
    fn negative_float_is_rejected() {
        let err = CashSession::open(
            &OpenSession {
                tenant_id: TenantId::new(),
                branch_id: BranchId::new(),
                session_id: CashSessionId::new(),
                scope: SessionScope::Branch,
                opened_by: UserId::new(),
                opening_float: usd(-1),
                occurred_at: None,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.validation_reason(), Some(ValidationReason::InvalidAmount));
    }

    #[test]
    fn close_within_threshold_is_closed() {
        let mut s = open(SessionScope::Branch);
        let close = close_cmd(&s, usd(13000), CashSessionPolicies::default());
        let events = execute(&mut s, &close).unwrap();

        let CashEvent::SessionClosed(closed) = &events[0] else {
            panic!("expected SessionClosed");
        };
        assert_eq!(closed.expected_cash, usd(13000));
        assert!(closed.variance.is_zero());
        assert_eq!(s.status(), CashSessionStatus::Closed);
        assert_eq!(s.version(), 2);
    }

    #[test]
    fn close_over_threshold_goes_to_review() {
        let mut s = open(SessionScope::Branch);
        let close = close_cmd(&s, usd(12800), CashSessionPolicies::default());
        execute(&mut s, &close).unwrap();
        assert_eq!(s.status(), CashSessionStatus::PendingReview);
        assert_eq!(s.closing().unwrap().variance, usd(-200));

        let lenient = CashSessionPolicies::default().with_variance_review_threshold(usd(500));
        let mut t = open(SessionScope::Branch);
        let close = close_cmd(&t, usd(12800), lenient);
        execute(&mut t, &close).unwrap();
        assert_eq!(t.status(), CashSessionStatus::Closed);
    }

    #[test]
    fn closing_twice_fails() {
        let mut s = open(SessionScope::Branch);
        let close = close_cmd(&s, usd(13000), CashSessionPolicies::default());
        execute(&mut s, &close).unwrap();
        let err = s
            .handle(&close_cmd(&s, usd(13000), CashSessionPolicies::default()))
            .unwrap_err();
        assert_eq!(err.validation_reason(), Some(ValidationReason::SessionNotOpen));
    }

    #[test]
    fn review_then_approve() {
        let mut s = open(SessionScope::Branch);
        let close = close_cmd(&s, usd(13000), CashSessionPolicies::default());
        execute(&mut s, &close).unwrap();

        let approve = SessionCommand::Approve(ApproveSession {
            approved_by: UserId::new(),
            note: None,
            at: Utc::now(),
        });
        assert!(s.handle(&approve).is_err());

        execute(
            &mut s,
            &SessionCommand::RequestReview(RequestReview {
                requested_by: UserId::new(),
                reason: Some("spot check".into()),
                at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(s.status(), CashSessionStatus::PendingReview);

        execute(&mut s, &approve).unwrap();
        assert_eq!(s.status(), CashSessionStatus::Approved);
        assert!(s.approved_by().is_some());
        assert_eq!(s.version(), 4);
    }

    #[test]
    fn take_over_keeps_session_open() {
        let mut s = open(SessionScope::Register(RegisterId::new()));
        let next = UserId::new();
        execute(
            &mut s,
            &SessionCommand::TakeOver(TakeOverSession {
                new_actor: next,
                reason: None,
                at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(s.is_open());
        assert_eq!(s.responsible_actor(), next);
        assert_ne!(s.opened_by(), next);
    }

    #[test]
    fn slots_follow_scope() {
        let register = RegisterId::new();
        let a = open(SessionScope::Register(register));
        let mut b = CashSession::restore(a.snapshot());
        assert!(a.occupies_same_slot(&b));

        let snapshot = CashSessionSnapshot {
            register_id: None,
            ..b.snapshot()
        };
        b = CashSession::restore(snapshot);
        assert!(!a.occupies_same_slot(&b));
    }
}
