//! Infrastructure layer: transactions, ledger stores, outbox, projections and
//! the application services built on them.
//!
//! Two backends implement every storage port: [`memory::InMemoryLedger`] for
//! tests/dev and [`postgres::PgLedger`] for production.

pub mod audit;
pub mod config;
pub mod error;
pub mod memory;
pub mod outbox;
pub mod ports;
pub mod postgres;
pub mod projector;
pub mod read_model;
pub mod store;
pub mod subscribers;
pub mod transaction;
pub mod use_cases;

pub use audit::{AuditAction, AuditRecord, AuditWriter};
pub use config::{AppConfig, ConfigError};
pub use error::{StoreError, UseCaseError};
pub use memory::{InMemoryLedger, MemoryTx};
pub use outbox::{
    DispatchReport, DomainEvent, OutboxDispatcher, OutboxDispatcherConfig, OutboxRecord,
    OutboxStore, publish_via_outbox,
};
pub use ports::{
    BranchAssignment, CashPolicyPort, InMemoryCashPolicies, InMemoryStockCatalog, PortError,
    StockCatalogPort,
};
pub use postgres::{PgCashPolicies, PgLedger, PgStockCatalog, PgTx};
pub use projector::{BalanceProjector, LowStockAlert};
pub use store::{CashLedgerStore, CashSessionStore, InventoryLedgerStore, LedgerStores, RowLock};
pub use subscribers::{BusForwarder, LowStockMonitor, StockLevel, StockLevelKey};
pub use transaction::{TransactionManager, read_only, with_transaction};
pub use use_cases::{CashSessions, InventoryMovements, SaleCashPayment};
