//! Inventory ledger domain.
//!
//! Pure rules for the stock journal: which movements exist, what sign each
//! one carries, which inputs are rejected, and the events emitted once the
//! entries are stored. No IO here; persistence and transactions live in
//! `tallyline-infra`.

pub mod event;
pub mod journal;
pub mod movement;

pub use event::{InventoryEvent, SaleLineMovedV1, SaleStockMovedV1, StockMovedV1};
pub use journal::{InventoryEntry, InventoryReason, JournalFilter, NewInventoryEntry, sum_deltas};
pub use movement::{
    CorrectStock, InventoryCommand, ReceiveStock, SaleLine, SaleMovement, SaleStockLines,
    WasteStock, plan_correction, plan_receive, plan_sale_lines, plan_waste,
};
