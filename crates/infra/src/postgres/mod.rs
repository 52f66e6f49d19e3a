//! PostgreSQL backend.
//!
//! Every store method runs on the caller's transaction. Tenant scope is part of
//! every predicate. The database enforces what the in-memory backend checks at
//! commit:
//!
//! - partial unique indexes allow one `OPEN` session per register, and one per
//!   branch for device-agnostic sessions
//! - recording a movement reads the session `FOR SHARE`, status changes read it
//!   `FOR UPDATE`, so a close waits for in-flight movements and sees them
//! - session updates compare the `version` column
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | ColumnDecode / Decode / ColumnNotFound | N/A | `Serialization` |
//! | RowNotFound | N/A | `NotFound` |
//! | PoolClosed / PoolTimedOut / Io / other | N/A | `Backend` |

mod outbox;
mod ports;
mod rows;
pub mod schema;
mod stores;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::transaction::TransactionManager;

pub use ports::{PgCashPolicies, PgStockCatalog};
pub use schema::{SCHEMA, ensure_schema};

type PgTransaction = Transaction<'static, Postgres>;

/// Transaction handle of [`PgLedger`]. Clones share the same database transaction.
#[derive(Debug, Clone)]
pub struct PgTx(Arc<Mutex<Option<PgTransaction>>>);

impl PgTx {
    fn new(tx: PgTransaction) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    async fn take(&self) -> Result<PgTransaction, StoreError> {
        self.0.lock().await.take().ok_or_else(finished)
    }
}

fn finished() -> StoreError {
    StoreError::Transaction("transaction already committed or rolled back".to_string())
}

/// Borrow the live connection behind a locked handle.
pub(crate) fn conn(guard: &mut Option<PgTransaction>) -> Result<&mut PgConnection, StoreError> {
    guard.as_deref_mut().ok_or_else(finished)
}

/// Ledger backend on a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: Arc<PgPool>,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionManager for PgLedger {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgTx::new(tx))
    }

    #[instrument(skip(self, tx), err)]
    async fn commit(&self, tx: PgTx) -> Result<(), StoreError> {
        tx.take()
            .await?
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(&self, tx: PgTx) -> Result<(), StoreError> {
        let tx = tx.take().await?;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;
        debug!("transaction rolled back");
        Ok(())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Unique violations are conflicts. Data exceptions (class 22, e.g. numeric
/// overflow) and check violations are permanent. Anything else may be transient.
fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23505") => StoreError::Conflict(msg),
        Some("23514") => StoreError::InvalidData(msg),
        Some(c) if c.starts_with("22") => StoreError::InvalidData(msg),
        _ => StoreError::Backend(msg),
    }
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            classify_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("row not found in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Serialization(format!("failed to decode row in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
