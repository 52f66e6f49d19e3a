//! In-memory backend implementing every storage port.
//!
//! Intended for tests/dev. Writes are staged on the transaction handle and
//! applied atomically at commit, after the same checks the database enforces
//! with constraints and row locks:
//!
//! - at most one open session per register (or per branch when device-agnostic)
//! - session updates carry the version they were read at
//! - a session cannot leave OPEN if a movement for it committed after the
//!   closing transaction began
//! - a movement's session must still be OPEN when it commits

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use tallyline_cash::{CashMovement, CashSession, NewCashMovement, SessionScope};
use tallyline_core::{
    AggregateRoot, BranchId, CashAmounts, CashMovementId, CashSessionId, ExpectedVersion,
    LedgerEntryId, OutboxId, StockItemId, TenantId, checked_sum,
};
use tallyline_inventory::{InventoryEntry, JournalFilter, NewInventoryEntry};

use crate::audit::{AuditRecord, AuditWriter};
use crate::error::StoreError;
use crate::outbox::{OutboxRecord, OutboxStore};
use crate::store::{CashLedgerStore, CashSessionStore, InventoryLedgerStore, RowLock};
use crate::transaction::TransactionManager;

#[derive(Debug, Default)]
struct State {
    /// Bumped once per applied write.
    seq: u64,
    inventory: Vec<InventoryEntry>,
    movements: Vec<(u64, CashMovement)>,
    sessions: Vec<CashSession>,
    outbox: Vec<OutboxRecord>,
    audit: Vec<AuditRecord>,
}

#[derive(Debug, Default)]
struct Staged {
    begun_at: u64,
    finished: bool,
    entries: Vec<InventoryEntry>,
    movements: Vec<CashMovement>,
    inserted: Vec<CashSession>,
    updated: Vec<(CashSession, ExpectedVersion)>,
    outbox: Vec<OutboxRecord>,
    sent: Vec<(OutboxId, DateTime<Utc>)>,
    audit: Vec<AuditRecord>,
    locked: Vec<OutboxId>,
}

/// Transaction handle of [`InMemoryLedger`].
#[derive(Debug, Clone)]
pub struct MemoryTx(Arc<Mutex<Staged>>);

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<State>,
    /// Outbox rows claimed by an in-flight transaction.
    locked: Mutex<HashSet<OutboxId>>,
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

fn overflow(what: &str) -> StoreError {
    StoreError::InvalidData(format!("{what} overflowed"))
}

fn matches_filter(e: &InventoryEntry, filter: &JournalFilter) -> bool {
    filter.reason.is_none_or(|r| e.reason == r)
        && filter.ref_sale_id.is_none_or(|s| e.ref_sale_id == Some(s))
        && filter.occurred_from.is_none_or(|from| e.occurred_at >= from)
        && filter.occurred_to.is_none_or(|to| e.occurred_at <= to)
}

/// Sessions as this unit of work sees them: committed rows overlaid with its
/// own updates, plus its own inserts.
fn session_view(state: &State, staged: &Staged) -> Vec<CashSession> {
    let mut view: Vec<CashSession> = state.sessions.clone();
    view.extend(staged.inserted.iter().cloned());
    for (updated, _) in &staged.updated {
        if let Some(slot) = view.iter_mut().find(|s| s.id() == updated.id()) {
            *slot = updated.clone();
        }
    }
    view
}

fn in_scope(session: &CashSession, branch_id: BranchId, scope: SessionScope) -> bool {
    match scope {
        SessionScope::Register(_) => session.scope() == scope,
        SessionScope::Branch => {
            session.branch_id() == branch_id && session.scope() == SessionScope::Branch
        }
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| poisoned())
    }

    fn staged<'a>(&self, tx: &'a MemoryTx) -> Result<MutexGuard<'a, Staged>, StoreError> {
        let staged = tx.0.lock().map_err(|_| poisoned())?;
        if staged.finished {
            return Err(StoreError::Transaction(
                "transaction already committed or rolled back".to_string(),
            ));
        }
        Ok(staged)
    }

    fn release_locks(&self, ids: &[OutboxId]) {
        if let Ok(mut locked) = self.locked.lock() {
            for id in ids {
                locked.remove(id);
            }
        }
    }

    /// Committed inventory entries, in insertion order.
    pub fn inventory_entries(&self) -> Vec<InventoryEntry> {
        self.state
            .read()
            .map(|s| s.inventory.clone())
            .unwrap_or_default()
    }

    pub fn cash_movements(&self) -> Vec<CashMovement> {
        self.state
            .read()
            .map(|s| s.movements.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    pub fn sessions(&self) -> Vec<CashSession> {
        self.state
            .read()
            .map(|s| s.sessions.clone())
            .unwrap_or_default()
    }

    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state
            .read()
            .map(|s| s.outbox.clone())
            .unwrap_or_default()
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.state
            .read()
            .map(|s| s.audit.clone())
            .unwrap_or_default()
    }

    fn check_and_apply(state: &mut State, staged: &mut Staged) -> Result<(), StoreError> {
        let mut sessions = state.sessions.clone();

        for (updated, expected) in &staged.updated {
            // Sessions inserted by this same unit of work have nothing to race with.
            let Some(current) = sessions.iter_mut().find(|s| s.id() == updated.id()) else {
                continue;
            };
            if !expected.matches(current.version()) {
                return Err(StoreError::Conflict(format!(
                    "cash session {} changed concurrently (expected {expected:?}, found {})",
                    updated.id(),
                    current.version()
                )));
            }
            if current.is_open() && !updated.is_open() {
                let raced = state.movements.iter().any(|(seq, m)| {
                    *seq > staged.begun_at && m.session_id == *updated.id()
                });
                if raced {
                    return Err(StoreError::Conflict(format!(
                        "cash session {} received a movement while closing",
                        updated.id()
                    )));
                }
            }
            *current = updated.clone();
        }

        for inserted in &staged.inserted {
            let latest = staged
                .updated
                .iter()
                .rev()
                .find(|(s, _)| s.id() == inserted.id())
                .map(|(s, _)| s)
                .unwrap_or(inserted);
            if latest.is_open()
                && sessions
                    .iter()
                    .any(|s| s.is_open() && s.id() != latest.id() && s.occupies_same_slot(latest))
            {
                return Err(StoreError::Conflict(format!(
                    "an open cash session already exists for the slot of {}",
                    latest.id()
                )));
            }
            sessions.push(latest.clone());
        }

        for m in &staged.movements {
            let open = sessions
                .iter()
                .find(|s| *s.id() == m.session_id)
                .is_some_and(CashSession::is_open);
            if !open {
                return Err(StoreError::Conflict(format!(
                    "cash session {} is no longer open",
                    m.session_id
                )));
            }
        }

        for (id, _) in &staged.sent {
            if !state.outbox.iter().any(|r| r.id == *id) {
                return Err(StoreError::NotFound(format!("outbox row {id}")));
            }
        }

        // All checks passed; apply.
        state.sessions = sessions;
        state.seq += (staged.updated.len() + staged.inserted.len()) as u64;
        for e in staged.entries.drain(..) {
            state.seq += 1;
            state.inventory.push(e);
        }
        for m in staged.movements.drain(..) {
            state.seq += 1;
            let seq = state.seq;
            state.movements.push((seq, m));
        }
        for r in staged.outbox.drain(..) {
            state.seq += 1;
            state.outbox.push(r);
        }
        for (id, at) in staged.sent.drain(..) {
            if let Some(row) = state.outbox.iter_mut().find(|r| r.id == id) {
                if row.sent_at.is_none() {
                    row.sent_at = Some(at);
                }
            }
        }
        state.audit.append(&mut staged.audit);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryLedger {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let begun_at = self.read_state()?.seq;
        Ok(MemoryTx(Arc::new(Mutex::new(Staged {
            begun_at,
            ..Staged::default()
        }))))
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        let mut staged = self.staged(&tx)?;
        staged.finished = true;
        let locked = std::mem::take(&mut staged.locked);

        let result = match self.state.write() {
            Ok(mut state) => Self::check_and_apply(&mut state, &mut staged),
            Err(_) => Err(poisoned()),
        };
        self.release_locks(&locked);
        result
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), StoreError> {
        let mut staged = self.staged(&tx)?;
        staged.finished = true;
        let locked = std::mem::take(&mut staged.locked);
        self.release_locks(&locked);
        Ok(())
    }
}

#[async_trait]
impl InventoryLedgerStore<MemoryTx> for InMemoryLedger {
    async fn append_entry(
        &self,
        tx: &MemoryTx,
        entry: NewInventoryEntry,
    ) -> Result<InventoryEntry, StoreError> {
        let stored = InventoryEntry::from_new(entry, LedgerEntryId::new(), Utc::now());
        self.staged(tx)?.entries.push(stored.clone());
        Ok(stored)
    }

    async fn query_entries(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        filter: &JournalFilter,
    ) -> Result<Vec<InventoryEntry>, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        let mut out: Vec<InventoryEntry> = state
            .inventory
            .iter()
            .chain(staged.entries.iter())
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.branch_id == branch_id
                    && e.stock_item_id == stock_item_id
                    && matches_filter(e, filter)
            })
            .cloned()
            .collect();
        // Stable: equal business times keep insertion order.
        out.sort_by_key(|e| e.occurred_at);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn sum_deltas(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Decimal, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        let deltas = state
            .inventory
            .iter()
            .chain(staged.entries.iter())
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.branch_id == branch_id
                    && e.stock_item_id == stock_item_id
                    && as_of.is_none_or(|t| e.occurred_at <= t)
            })
            .map(|e| e.delta);
        checked_sum(deltas, "on-hand balance").map_err(StoreError::from)
    }

    async fn sum_deltas_by_item(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<(StockItemId, Decimal)>, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        let mut sums: BTreeMap<StockItemId, Decimal> = BTreeMap::new();
        for e in state.inventory.iter().chain(staged.entries.iter()) {
            if e.tenant_id == tenant_id && e.branch_id == branch_id {
                let sum = sums.entry(e.stock_item_id).or_default();
                *sum = sum
                    .checked_add(e.delta)
                    .ok_or_else(|| overflow("on-hand balance"))?;
            }
        }
        Ok(sums.into_iter().collect())
    }
}

#[async_trait]
impl CashLedgerStore<MemoryTx> for InMemoryLedger {
    async fn append_movement(
        &self,
        tx: &MemoryTx,
        movement: NewCashMovement,
    ) -> Result<CashMovement, StoreError> {
        let stored = CashMovement::from_new(movement, CashMovementId::new(), Utc::now());
        self.staged(tx)?.movements.push(stored.clone());
        Ok(stored)
    }

    async fn session_movements(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<Vec<CashMovement>, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        let mut out: Vec<CashMovement> = state
            .movements
            .iter()
            .map(|(_, m)| m)
            .chain(staged.movements.iter())
            .filter(|m| m.tenant_id == tenant_id && m.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.occurred_at);
        Ok(out)
    }

    async fn session_flows(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<(CashAmounts, CashAmounts), StoreError> {
        let movements = self.session_movements(tx, tenant_id, session_id).await?;
        let mut cash_in = CashAmounts::ZERO;
        let mut cash_out = CashAmounts::ZERO;
        for m in &movements {
            let (inc, dec) = m.amount.split_signed();
            cash_in = cash_in.try_add(&inc, "total cash in")?;
            cash_out = cash_out.try_add(&dec, "total cash out")?;
        }
        Ok((cash_in, cash_out))
    }
}

#[async_trait]
impl CashSessionStore<MemoryTx> for InMemoryLedger {
    async fn insert_session(&self, tx: &MemoryTx, session: &CashSession) -> Result<(), StoreError> {
        let mut staged = self.staged(tx)?;
        let state = self.read_state()?;
        let view = session_view(&state, &staged);
        if view.iter().any(|s| s.id() == session.id()) {
            return Err(StoreError::Conflict(format!(
                "cash session {} already exists",
                session.id()
            )));
        }
        if view
            .iter()
            .any(|s| s.is_open() && s.occupies_same_slot(session))
        {
            return Err(StoreError::Conflict(
                "an open cash session already exists for this register".to_string(),
            ));
        }
        staged.inserted.push(session.clone());
        Ok(())
    }

    async fn update_session(
        &self,
        tx: &MemoryTx,
        session: &CashSession,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut staged = self.staged(tx)?;
        let state = self.read_state()?;
        let view = session_view(&state, &staged);
        let Some(current) = view.iter().find(|s| s.id() == session.id()) else {
            return Err(StoreError::NotFound(format!("cash session {}", session.id())));
        };
        if !expected.matches(current.version()) {
            return Err(StoreError::Conflict(format!(
                "cash session {} changed concurrently (expected {expected:?}, found {})",
                session.id(),
                current.version()
            )));
        }
        staged.updated.push((session.clone(), expected));
        Ok(())
    }

    async fn load_session(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        session_id: CashSessionId,
        _lock: RowLock,
    ) -> Result<Option<CashSession>, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        Ok(session_view(&state, &staged)
            .into_iter()
            .find(|s| *s.id() == session_id && s.tenant_id() == tenant_id))
    }

    async fn find_open_session(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        branch_id: BranchId,
        scope: SessionScope,
    ) -> Result<Option<CashSession>, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        Ok(session_view(&state, &staged).into_iter().find(|s| {
            s.tenant_id() == tenant_id && s.is_open() && in_scope(s, branch_id, scope)
        }))
    }

    async fn list_sessions(
        &self,
        tx: &MemoryTx,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<CashSession>, StoreError> {
        let staged = self.staged(tx)?;
        let state = self.read_state()?;
        let mut out: Vec<CashSession> = session_view(&state, &staged)
            .into_iter()
            .filter(|s| s.tenant_id() == tenant_id && s.branch_id() == branch_id)
            .collect();
        out.sort_by(|a, b| b.opened_at().cmp(&a.opened_at()));
        Ok(out)
    }
}

#[async_trait]
impl OutboxStore<MemoryTx> for InMemoryLedger {
    async fn insert_record(&self, tx: &MemoryTx, record: OutboxRecord) -> Result<(), StoreError> {
        self.staged(tx)?.outbox.push(record);
        Ok(())
    }

    async fn lock_unsent(
        &self,
        tx: &MemoryTx,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut staged = self.staged(tx)?;
        let state = self.read_state()?;
        let mut locked = self.locked.lock().map_err(|_| poisoned())?;

        let rows: Vec<OutboxRecord> = state
            .outbox
            .iter()
            .filter(|r| !r.is_sent() && !locked.contains(&r.id))
            .take(limit)
            .cloned()
            .collect();
        for r in &rows {
            locked.insert(r.id);
            staged.locked.push(r.id);
        }
        Ok(rows)
    }

    async fn mark_sent(
        &self,
        tx: &MemoryTx,
        id: OutboxId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.staged(tx)?.sent.push((id, sent_at));
        Ok(())
    }
}

#[async_trait]
impl AuditWriter<MemoryTx> for InMemoryLedger {
    async fn write_audit(&self, tx: &MemoryTx, record: AuditRecord) -> Result<(), StoreError> {
        self.staged(tx)?.audit.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tallyline_cash::{CashMovementStatus, CashMovementType, OpenSession};
    use tallyline_core::{RegisterId, UserId};
    use tallyline_inventory::InventoryReason;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn open(tenant: TenantId, branch: BranchId, scope: SessionScope) -> CashSession {
        let (session, _) = CashSession::open(
            &OpenSession {
                tenant_id: tenant,
                branch_id: branch,
                session_id: CashSessionId::new(),
                scope,
                opened_by: UserId::new(),
                opening_float: CashAmounts::usd(dec(50)),
                occurred_at: None,
            },
            Utc::now(),
        )
        .unwrap();
        session
    }

    fn sale_cash(session: &CashSession) -> NewCashMovement {
        NewCashMovement {
            tenant_id: session.tenant_id(),
            branch_id: session.branch_id(),
            register_id: session.scope().register_id(),
            session_id: *session.id(),
            actor_id: UserId::new(),
            movement_type: CashMovementType::SaleCash,
            status: CashMovementStatus::Recorded,
            amount: CashAmounts::usd(dec(10)),
            ref_sale_id: None,
            reason: None,
            approved_by: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reads_see_own_uncommitted_writes_only() {
        let ledger = InMemoryLedger::new();
        let (t, b, i) = (TenantId::new(), BranchId::new(), StockItemId::new());

        let tx = ledger.begin().await.unwrap();
        ledger
            .append_entry(
                &tx,
                NewInventoryEntry {
                    tenant_id: t,
                    branch_id: b,
                    stock_item_id: i,
                    delta: dec(4),
                    reason: InventoryReason::Receive,
                    ref_sale_id: None,
                    note: None,
                    actor_id: None,
                    occurred_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(ledger.sum_deltas(&tx, t, b, i, None).await.unwrap(), dec(4));

        let other = ledger.begin().await.unwrap();
        assert_eq!(ledger.sum_deltas(&other, t, b, i, None).await.unwrap(), dec(0));
        ledger.rollback(other).await.unwrap();

        ledger.commit(tx).await.unwrap();
        assert_eq!(ledger.inventory_entries().len(), 1);
    }

    #[tokio::test]
    async fn finished_handles_are_rejected() {
        let ledger = InMemoryLedger::new();
        let tx = ledger.begin().await.unwrap();
        ledger.commit(tx.clone()).await.unwrap();
        let err = ledger.commit(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));
    }

    #[tokio::test]
    async fn second_open_session_on_a_register_conflicts_at_commit() {
        let ledger = InMemoryLedger::new();
        let (t, b) = (TenantId::new(), BranchId::new());
        let scope = SessionScope::Register(RegisterId::new());

        let tx1 = ledger.begin().await.unwrap();
        let tx2 = ledger.begin().await.unwrap();
        ledger.insert_session(&tx1, &open(t, b, scope)).await.unwrap();
        ledger.insert_session(&tx2, &open(t, b, scope)).await.unwrap();

        ledger.commit(tx1).await.unwrap();
        let err = ledger.commit(tx2).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(ledger.sessions().len(), 1);
    }

    #[tokio::test]
    async fn branch_and_register_scopes_do_not_collide() {
        let ledger = InMemoryLedger::new();
        let (t, b) = (TenantId::new(), BranchId::new());

        let tx = ledger.begin().await.unwrap();
        ledger.insert_session(&tx, &open(t, b, SessionScope::Branch)).await.unwrap();
        ledger
            .insert_session(&tx, &open(t, b, SessionScope::Register(RegisterId::new())))
            .await
            .unwrap();
        let dup = ledger.insert_session(&tx, &open(t, b, SessionScope::Branch)).await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
        ledger.commit(tx).await.unwrap();
        assert_eq!(ledger.sessions().len(), 2);
    }

    #[tokio::test]
    async fn movement_fails_if_session_closed_first() {
        let ledger = InMemoryLedger::new();
        let session = open(TenantId::new(), BranchId::new(), SessionScope::Branch);

        let setup = ledger.begin().await.unwrap();
        ledger.insert_session(&setup, &session).await.unwrap();
        ledger.commit(setup).await.unwrap();

        let mover = ledger.begin().await.unwrap();
        ledger.append_movement(&mover, sale_cash(&session)).await.unwrap();

        // Close in another transaction and commit first.
        let closer = ledger.begin().await.unwrap();
        let closed = CashSession::restore(tallyline_cash::CashSessionSnapshot {
            status: tallyline_cash::CashSessionStatus::Closed,
            version: session.version() + 1,
            ..session.snapshot()
        });
        ledger
            .update_session(&closer, &closed, ExpectedVersion::Exact(session.version()))
            .await
            .unwrap();
        ledger.commit(closer).await.unwrap();

        let err = ledger.commit(mover).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(ledger.cash_movements().is_empty());
    }

    #[tokio::test]
    async fn close_fails_if_movement_committed_meanwhile() {
        let ledger = InMemoryLedger::new();
        let session = open(TenantId::new(), BranchId::new(), SessionScope::Branch);

        let setup = ledger.begin().await.unwrap();
        ledger.insert_session(&setup, &session).await.unwrap();
        ledger.commit(setup).await.unwrap();

        let closer = ledger.begin().await.unwrap();

        let mover = ledger.begin().await.unwrap();
        ledger.append_movement(&mover, sale_cash(&session)).await.unwrap();
        ledger.commit(mover).await.unwrap();

        let closed = CashSession::restore(tallyline_cash::CashSessionSnapshot {
            status: tallyline_cash::CashSessionStatus::Closed,
            version: session.version() + 1,
            ..session.snapshot()
        });
        ledger
            .update_session(&closer, &closed, ExpectedVersion::Exact(session.version()))
            .await
            .unwrap();
        let err = ledger.commit(closer).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(ledger.sessions()[0].is_open());
    }

    #[tokio::test]
    async fn locked_outbox_rows_are_skipped_by_other_transactions() {
        let ledger = InMemoryLedger::new();
        let setup = ledger.begin().await.unwrap();
        for _ in 0..3 {
            ledger
                .insert_record(
                    &setup,
                    OutboxRecord {
                        id: OutboxId::new(),
                        tenant_id: TenantId::new(),
                        event_type: "inventory.stock_received".into(),
                        payload: serde_json::json!({}),
                        created_at: Utc::now(),
                        sent_at: None,
                    },
                )
                .await
                .unwrap();
        }
        ledger.commit(setup).await.unwrap();

        let a = ledger.begin().await.unwrap();
        let b = ledger.begin().await.unwrap();
        assert_eq!(ledger.lock_unsent(&a, 2).await.unwrap().len(), 2);
        assert_eq!(ledger.lock_unsent(&b, 10).await.unwrap().len(), 1);

        ledger.rollback(a).await.unwrap();
        let c = ledger.begin().await.unwrap();
        assert_eq!(ledger.lock_unsent(&c, 10).await.unwrap().len(), 2);
    }
}
