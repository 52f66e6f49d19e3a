//! Disposable, tenant-isolated read models fed by outbox subscribers.
//!
//! Everything here can be dropped and rebuilt from the ledgers.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
