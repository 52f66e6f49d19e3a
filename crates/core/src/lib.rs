//! `tallyline-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, aggregate mechanics and exact money/quantity
//! value objects shared by the inventory and cash ledgers.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion, execute};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ValidationReason};
pub use id::{
    BranchId, CashMovementId, CashSessionId, LedgerEntryId, OutboxId, RegisterId, SaleId,
    StockItemId, TenantId, UserId,
};
pub use money::{CashAmounts, Currency, Quantity, checked_sum};
pub use value_object::ValueObject;
