//! Cash session use cases.
//!
//! Status changes, the movements they depend on, the outbox event and the
//! audit record always commit together. The session row is read with a share
//! lock when recording a movement and an exclusive lock when changing status,
//! so a close cannot slip in between a movement's check and its commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use tallyline_cash::{
    ApproveSession, CashEvent, CashMovement, CashMovementType, CashSession, CashSessionPolicies,
    CloseSession, MovementRecordedV1, OpenSession, RecordCashMovement, RequestReview,
    SessionCommand, SessionScope, SessionTotals, TakeOverSession, plan_movement,
};
use tallyline_core::{
    AggregateRoot, BranchId, CashAmounts, CashSessionId, DomainError, ExpectedVersion, SaleId,
    TenantId, UserId, ValidationReason, execute,
};
use tallyline_events::Event;

use crate::audit::AuditRecord;
use crate::error::UseCaseError;
use crate::outbox::publish_via_outbox;
use crate::ports::CashPolicyPort;
use crate::store::{LedgerStores, RowLock};
use crate::transaction::{TransactionManager, read_only, with_transaction};

/// Cash taken for a sale, routed to whichever session is open for the till.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleCashPayment {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub scope: SessionScope,
    pub sale_id: SaleId,
    pub amount: CashAmounts,
    pub actor_id: UserId,
    pub occurred_at: Option<DateTime<Utc>>,
}

pub struct CashSessions<M: TransactionManager> {
    transactions: Arc<M>,
    stores: LedgerStores<M::Tx>,
    policies: Arc<dyn CashPolicyPort>,
}

impl<M: TransactionManager> CashSessions<M> {
    pub fn new(
        transactions: Arc<M>,
        stores: LedgerStores<M::Tx>,
        policies: Arc<dyn CashPolicyPort>,
    ) -> Self {
        Self {
            transactions,
            stores,
            policies,
        }
    }

    /// Open a session. Fails with a conflict when the register (or branch,
    /// for device-agnostic sessions) already has one open.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, branch_id = %cmd.branch_id), err)]
    pub async fn open(&self, cmd: OpenSession) -> Result<CashSession, UseCaseError> {
        let (session, event) = CashSession::open(&cmd, Utc::now())?;
        let stores = self.stores.clone();

        let session = with_transaction(&*self.transactions, |tx| async move {
            if let Some(existing) = stores
                .sessions
                .find_open_session(&tx, cmd.tenant_id, cmd.branch_id, cmd.scope)
                .await?
            {
                return Err(DomainError::conflict(format!(
                    "cash session {} is already open here",
                    existing.id()
                ))
                .into());
            }
            stores.sessions.insert_session(&tx, &session).await?;
            publish_via_outbox(&*stores.outbox, &tx, &event).await?;
            Ok::<_, UseCaseError>(session)
        })
        .await?;

        info!(session_id = %session.id(), "cash session opened");
        Ok(session)
    }

    /// Record a movement on an open session.
    #[instrument(
        skip(self, cmd),
        fields(tenant_id = %cmd.tenant_id, session_id = %cmd.session_id, movement_type = %cmd.movement_type),
        err
    )]
    pub async fn record_movement(&self, cmd: RecordCashMovement) -> Result<CashMovement, UseCaseError> {
        let policies = self.policies.cash_session_policies(cmd.tenant_id).await?;
        let stores = self.stores.clone();

        let movement = with_transaction(&*self.transactions, |tx| async move {
            let session = stores
                .sessions
                .load_session(&tx, cmd.tenant_id, cmd.session_id, RowLock::Share)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("cash session {}", cmd.session_id)))?;
            append_movement(&stores, &tx, &session, &cmd, &policies).await
        })
        .await?;

        info!(movement_id = %movement.id, amount_usd = %movement.amount.usd, amount_khr = %movement.amount.khr, "cash movement recorded");
        Ok(movement)
    }

    /// Record `SALE_CASH` on the session open for the payment's till.
    ///
    /// Without an open session this fails when the tenant requires sessions
    /// for sales, and otherwise records nothing and returns `None`.
    #[instrument(skip(self, payment), fields(tenant_id = %payment.tenant_id, sale_id = %payment.sale_id), err)]
    pub async fn record_sale_cash(
        &self,
        payment: SaleCashPayment,
    ) -> Result<Option<CashMovement>, UseCaseError> {
        let policies = self.policies.cash_session_policies(payment.tenant_id).await?;
        let stores = self.stores.clone();

        with_transaction(&*self.transactions, |tx| async move {
            let open = stores
                .sessions
                .find_open_session(&tx, payment.tenant_id, payment.branch_id, payment.scope)
                .await?;
            let Some(open) = open else {
                if policies.require_session_for_sales {
                    return Err(DomainError::validation(
                        ValidationReason::SessionNotOpen,
                        "no open cash session for this till",
                    )
                    .into());
                }
                return Ok(None);
            };

            // Re-read under a share lock; the session may have closed meanwhile.
            let session = stores
                .sessions
                .load_session(&tx, payment.tenant_id, *open.id(), RowLock::Share)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("cash session {}", open.id())))?;
            let cmd = RecordCashMovement {
                tenant_id: payment.tenant_id,
                session_id: *session.id(),
                movement_type: CashMovementType::SaleCash,
                amount: payment.amount,
                actor_id: payment.actor_id,
                ref_sale_id: Some(payment.sale_id),
                reason: None,
                approved_by: None,
                occurred_at: payment.occurred_at,
            };
            append_movement(&stores, &tx, &session, &cmd, &policies)
                .await
                .map(Some)
        })
        .await
    }

    pub async fn take_over(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
        new_actor: UserId,
        reason: Option<String>,
    ) -> Result<CashSession, UseCaseError> {
        let cmd = SessionCommand::TakeOver(TakeOverSession {
            new_actor,
            reason,
            at: Utc::now(),
        });
        self.transition(tenant_id, session_id, cmd).await
    }

    /// Close the session against the drawer count.
    ///
    /// Expected cash is aggregated from the ledger inside the same transaction.
    /// Lands in `CLOSED`, or `PENDING_REVIEW` when the variance is beyond the
    /// tenant's review threshold.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id), err)]
    pub async fn close(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
        closed_by: UserId,
        counted_cash: CashAmounts,
    ) -> Result<CashSession, UseCaseError> {
        let policies = self.policies.cash_session_policies(tenant_id).await?;
        let stores = self.stores.clone();

        let session = with_transaction(&*self.transactions, |tx| async move {
            let mut session = load_for_update(&stores, &tx, tenant_id, session_id).await?;
            let (cash_in, cash_out) = stores.cash.session_flows(&tx, tenant_id, session_id).await?;
            let totals = SessionTotals::from_flows(session.opening_float(), cash_in, cash_out)?;

            let cmd = SessionCommand::Close(CloseSession {
                closed_by,
                counted_cash,
                totals,
                policies,
                at: Utc::now(),
            });
            let prev = session.version();
            let events = execute(&mut session, &cmd)?;
            persist_transition(&stores, &tx, &session, prev, &events).await?;
            Ok::<_, UseCaseError>(session)
        })
        .await?;

        if let Some(closing) = session.closing() {
            info!(
                status = %session.status(),
                expected_usd = %closing.expected_cash.usd,
                variance_usd = %closing.variance.usd,
                variance_khr = %closing.variance.khr,
                "cash session closed"
            );
        }
        Ok(session)
    }

    pub async fn request_review(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
        requested_by: UserId,
        reason: Option<String>,
    ) -> Result<CashSession, UseCaseError> {
        let cmd = SessionCommand::RequestReview(RequestReview {
            requested_by,
            reason,
            at: Utc::now(),
        });
        self.transition(tenant_id, session_id, cmd).await
    }

    pub async fn approve(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
        approved_by: UserId,
        note: Option<String>,
    ) -> Result<CashSession, UseCaseError> {
        let cmd = SessionCommand::Approve(ApproveSession {
            approved_by,
            note,
            at: Utc::now(),
        });
        self.transition(tenant_id, session_id, cmd).await
    }

    /// The open session for a till, if any.
    pub async fn current_session(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        scope: SessionScope,
    ) -> Result<Option<CashSession>, UseCaseError> {
        let sessions = self.stores.sessions.clone();
        read_only(&*self.transactions, |tx| async move {
            Ok(sessions
                .find_open_session(&tx, tenant_id, branch_id, scope)
                .await?)
        })
        .await
    }

    pub async fn get(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<CashSession, UseCaseError> {
        let sessions = self.stores.sessions.clone();
        read_only(&*self.transactions, |tx| async move {
            sessions
                .load_session(&tx, tenant_id, session_id, RowLock::None)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("cash session {session_id}")).into())
        })
        .await
    }

    /// Sessions of a branch, newest first.
    pub async fn list(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<CashSession>, UseCaseError> {
        let sessions = self.stores.sessions.clone();
        read_only(&*self.transactions, |tx| async move {
            Ok(sessions.list_sessions(&tx, tenant_id, branch_id).await?)
        })
        .await
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %tenant_id, session_id = %session_id), err)]
    async fn transition(
        &self,
        tenant_id: TenantId,
        session_id: CashSessionId,
        cmd: SessionCommand,
    ) -> Result<CashSession, UseCaseError> {
        let stores = self.stores.clone();
        let session = with_transaction(&*self.transactions, |tx| async move {
            let mut session = load_for_update(&stores, &tx, tenant_id, session_id).await?;
            let prev = session.version();
            let events = execute(&mut session, &cmd)?;
            persist_transition(&stores, &tx, &session, prev, &events).await?;
            Ok::<_, UseCaseError>(session)
        })
        .await?;

        info!(status = %session.status(), responsible = %session.responsible_actor(), "cash session updated");
        Ok(session)
    }
}

async fn load_for_update<Tx: Sync>(
    stores: &LedgerStores<Tx>,
    tx: &Tx,
    tenant_id: TenantId,
    session_id: CashSessionId,
) -> Result<CashSession, UseCaseError> {
    stores
        .sessions
        .load_session(tx, tenant_id, session_id, RowLock::Update)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("cash session {session_id}")).into())
}

async fn append_movement<Tx: Sync>(
    stores: &LedgerStores<Tx>,
    tx: &Tx,
    session: &CashSession,
    cmd: &RecordCashMovement,
    policies: &CashSessionPolicies,
) -> Result<CashMovement, UseCaseError> {
    let planned = plan_movement(session, cmd, policies, Utc::now())?;
    let movement = stores.cash.append_movement(tx, planned).await?;

    let event = CashEvent::MovementRecorded(MovementRecordedV1::from_movement(&movement));
    publish_via_outbox(&*stores.outbox, tx, &event).await?;
    if let Some(record) = AuditRecord::for_cash(&event) {
        stores.audit.write_audit(tx, record).await?;
    }
    Ok(movement)
}

async fn persist_transition<Tx: Sync>(
    stores: &LedgerStores<Tx>,
    tx: &Tx,
    session: &CashSession,
    prev_version: u64,
    events: &[CashEvent],
) -> Result<(), UseCaseError> {
    stores
        .sessions
        .update_session(tx, session, ExpectedVersion::Exact(prev_version))
        .await?;
    for event in events {
        publish_via_outbox(&*stores.outbox, tx, event).await?;
        if let Some(record) = AuditRecord::for_cash(event) {
            stores.audit.write_audit(tx, record).await?;
        }
        tracing::debug!(event_type = event.event_type(), "session event staged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use tallyline_cash::{CashSessionStatus, policy::usd_threshold};
    use tallyline_core::RegisterId;

    use crate::memory::InMemoryLedger;
    use crate::ports::InMemoryCashPolicies;

    fn usd(v: i64) -> CashAmounts {
        CashAmounts::usd(Decimal::from(v))
    }

    fn setup(policies: CashSessionPolicies) -> (Arc<InMemoryLedger>, CashSessions<InMemoryLedger>, TenantId) {
        let ledger = Arc::new(InMemoryLedger::new());
        let tenant = TenantId::new();
        let table = Arc::new(InMemoryCashPolicies::new());
        table.set(tenant, policies);
        let service = CashSessions::new(ledger.clone(), LedgerStores::from_backend(ledger.clone()), table);
        (ledger, service, tenant)
    }

    fn open_cmd(tenant: TenantId, branch: BranchId, scope: SessionScope, float: i64) -> OpenSession {
        OpenSession {
            tenant_id: tenant,
            branch_id: branch,
            session_id: CashSessionId::new(),
            scope,
            opened_by: UserId::new(),
            opening_float: usd(float),
            occurred_at: None,
        }
    }

    fn movement(
        tenant: TenantId,
        session: CashSessionId,
        movement_type: CashMovementType,
        amount: CashAmounts,
    ) -> RecordCashMovement {
        RecordCashMovement {
            tenant_id: tenant,
            session_id: session,
            movement_type,
            amount,
            actor_id: UserId::new(),
            ref_sale_id: None,
            reason: Some("float top-up".into()),
            approved_by: None,
            occurred_at: None,
        }
    }

    #[tokio::test]
    async fn exact_count_closes_without_review() {
        let (_ledger, service, t) = setup(CashSessionPolicies::default());
        let session = service
            .open(open_cmd(t, BranchId::new(), SessionScope::Branch, 20))
            .await
            .unwrap();
        service
            .record_movement(movement(t, *session.id(), CashMovementType::PaidIn, usd(5)))
            .await
            .unwrap();

        let closed = service.close(t, *session.id(), UserId::new(), usd(25)).await.unwrap();
        assert_eq!(closed.status(), CashSessionStatus::Closed);
        assert!(closed.closing().unwrap().variance.is_zero());
    }

    #[tokio::test]
    async fn review_then_approve() {
        let policies = CashSessionPolicies::default()
            .with_variance_review_threshold(usd_threshold(Decimal::from(1)));
        let (ledger, service, t) = setup(policies);
        let session = service
            .open(open_cmd(t, BranchId::new(), SessionScope::Register(RegisterId::new()), 10))
            .await
            .unwrap();

        let closed = service.close(t, *session.id(), UserId::new(), usd(7)).await.unwrap();
        assert_eq!(closed.status(), CashSessionStatus::PendingReview);

        let approved = service
            .approve(t, *session.id(), UserId::new(), Some("counted twice".into()))
            .await
            .unwrap();
        assert_eq!(approved.status(), CashSessionStatus::Approved);
        assert_eq!(ledger.audit_records().len(), 2);

        let again = service.approve(t, *session.id(), UserId::new(), None).await.unwrap_err();
        assert_eq!(again.code(), "invalid_transition");
    }

    #[tokio::test]
    async fn movement_on_closed_session_is_rejected() {
        let (ledger, service, t) = setup(CashSessionPolicies::default());
        let session = service
            .open(open_cmd(t, BranchId::new(), SessionScope::Branch, 0))
            .await
            .unwrap();
        service.close(t, *session.id(), UserId::new(), usd(0)).await.unwrap();

        let err = service
            .record_movement(movement(t, *session.id(), CashMovementType::PaidIn, usd(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "session_not_open");
        assert!(ledger.cash_movements().is_empty());
    }

    #[tokio::test]
    async fn sale_cash_without_session_follows_policy() {
        let branch = BranchId::new();
        let payment = |t: TenantId| SaleCashPayment {
            tenant_id: t,
            branch_id: branch,
            scope: SessionScope::Branch,
            sale_id: SaleId::new(),
            amount: usd(3),
            actor_id: UserId::new(),
            occurred_at: None,
        };

        let (_, strict, t) = setup(CashSessionPolicies::default());
        let err = strict.record_sale_cash(payment(t)).await.unwrap_err();
        assert_eq!(err.code(), "session_not_open");

        let lenient = CashSessionPolicies {
            require_session_for_sales: false,
            ..CashSessionPolicies::default()
        };
        let (ledger, service, t) = setup(lenient);
        assert!(service.record_sale_cash(payment(t)).await.unwrap().is_none());
        assert!(ledger.cash_movements().is_empty());

        service.open(open_cmd(t, branch, SessionScope::Branch, 0)).await.unwrap();
        let recorded = service.record_sale_cash(payment(t)).await.unwrap().unwrap();
        assert_eq!(recorded.movement_type, CashMovementType::SaleCash);
        assert!(recorded.ref_sale_id.is_some());
    }

    #[tokio::test]
    async fn take_over_keeps_session_open() {
        let (_, service, t) = setup(CashSessionPolicies::default());
        let session = service
            .open(open_cmd(t, BranchId::new(), SessionScope::Branch, 0))
            .await
            .unwrap();
        let next = UserId::new();

        let taken = service
            .take_over(t, *session.id(), next, Some("shift change".into()))
            .await
            .unwrap();
        assert!(taken.is_open());
        assert_eq!(taken.responsible_actor(), next);
        assert_eq!(taken.opened_by(), session.opened_by());
    }
}
