//! Application services. Each operation is one unit of work.

pub mod cash;
pub mod inventory;

pub use cash::{CashSessions, SaleCashPayment};
pub use inventory::InventoryMovements;
