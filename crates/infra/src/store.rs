//! Storage ports for the ledgers and the session table.
//!
//! Every method takes the caller's transaction handle. Reads made with a
//! handle see that unit of work's own uncommitted writes.
//!
//! Balances are always aggregated from the entries on demand; no store keeps
//! a running total.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use tallyline_cash::{CashMovement, CashSession, NewCashMovement, SessionScope};
use tallyline_core::{BranchId, CashAmounts, CashSessionId, ExpectedVersion, StockItemId, TenantId};
use tallyline_inventory::{InventoryEntry, JournalFilter, NewInventoryEntry};

use crate::audit::AuditWriter;
use crate::error::StoreError;
use crate::outbox::OutboxStore;

/// Append-only inventory journal.
#[async_trait]
pub trait InventoryLedgerStore<Tx>: Send + Sync {
    /// Assign id and `created_at`, persist, return the stored entry.
    async fn append_entry(
        &self,
        tx: &Tx,
        entry: NewInventoryEntry,
    ) -> Result<InventoryEntry, StoreError>;

    /// Entries of one subject ordered by `occurred_at`, ties by insertion.
    async fn query_entries(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        filter: &JournalFilter,
    ) -> Result<Vec<InventoryEntry>, StoreError>;

    /// Sum of deltas, optionally only up to `as_of` (inclusive, business time).
    async fn sum_deltas(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_item_id: StockItemId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Decimal, StoreError>;

    /// Per-item sums for every item with entries at the branch.
    async fn sum_deltas_by_item(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<(StockItemId, Decimal)>, StoreError>;
}

/// Append-only cash movements, owned by their session.
#[async_trait]
pub trait CashLedgerStore<Tx>: Send + Sync {
    async fn append_movement(
        &self,
        tx: &Tx,
        movement: NewCashMovement,
    ) -> Result<CashMovement, StoreError>;

    async fn session_movements(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<Vec<CashMovement>, StoreError>;

    /// `(cash in, cash out)` for the session, both non-negative per currency.
    async fn session_flows(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        session_id: CashSessionId,
    ) -> Result<(CashAmounts, CashAmounts), StoreError>;
}

/// How a session row is read inside a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RowLock {
    /// Plain read.
    None,
    /// Blocks status changes until the reader finishes (movement recording).
    Share,
    /// Exclusive; taken before changing the row.
    Update,
}

#[async_trait]
pub trait CashSessionStore<Tx>: Send + Sync {
    /// Insert a new session. Fails with `Conflict` if another open session
    /// already holds the same register (or branch, when device-agnostic).
    async fn insert_session(&self, tx: &Tx, session: &CashSession) -> Result<(), StoreError>;

    /// Persist new state. `expected` is the version the row must still have.
    async fn update_session(
        &self,
        tx: &Tx,
        session: &CashSession,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    async fn load_session(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        session_id: CashSessionId,
        lock: RowLock,
    ) -> Result<Option<CashSession>, StoreError>;

    async fn find_open_session(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        branch_id: BranchId,
        scope: SessionScope,
    ) -> Result<Option<CashSession>, StoreError>;

    /// All sessions of a branch, newest first.
    async fn list_sessions(
        &self,
        tx: &Tx,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<CashSession>, StoreError>;
}

/// The storage ports an application service needs, sharing one `Tx` type.
pub struct LedgerStores<Tx> {
    pub inventory: Arc<dyn InventoryLedgerStore<Tx>>,
    pub cash: Arc<dyn CashLedgerStore<Tx>>,
    pub sessions: Arc<dyn CashSessionStore<Tx>>,
    pub outbox: Arc<dyn OutboxStore<Tx>>,
    pub audit: Arc<dyn AuditWriter<Tx>>,
}

impl<Tx> Clone for LedgerStores<Tx> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
            cash: self.cash.clone(),
            sessions: self.sessions.clone(),
            outbox: self.outbox.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<Tx> LedgerStores<Tx> {
    /// All ports served by one backend object.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: InventoryLedgerStore<Tx>
            + CashLedgerStore<Tx>
            + CashSessionStore<Tx>
            + OutboxStore<Tx>
            + AuditWriter<Tx>
            + 'static,
    {
        Self {
            inventory: backend.clone(),
            cash: backend.clone(),
            sessions: backend.clone(),
            outbox: backend.clone(),
            audit: backend,
        }
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxStore<Tx>>) -> Self {
        self.outbox = outbox;
        self
    }
}
