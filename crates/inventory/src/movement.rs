//! Typed inventory movements.
//!
//! Each command is validated and planned here, purely: the output is the list
//! of signed journal entries to append. Storage, transactions and events are
//! the caller's business.
//!
//! | Movement | Sign | Note |
//! |---|---|---|
//! | receive | + | optional |
//! | waste | - | required |
//! | correction | ± (non-zero) | required |
//! | sale deduction | - per line | - |
//! | void | + per line | - |
//! | reopen | - per line | - |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyline_core::{
    BranchId, DomainError, DomainResult, Quantity, SaleId, StockItemId, TenantId, UserId,
    ValidationReason,
};

use crate::journal::{InventoryReason, NewInventoryEntry};

/// Command: ReceiveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub stock_item_id: StockItemId,
    pub quantity: Quantity,
    pub note: Option<String>,
    pub actor_id: UserId,
    /// Business time; defaults to now. May be backdated.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Command: WasteStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasteStock {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub stock_item_id: StockItemId,
    pub quantity: Quantity,
    pub note: String,
    pub actor_id: UserId,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Command: CorrectStock (signed delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectStock {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub stock_item_id: StockItemId,
    pub delta: Decimal,
    pub note: String,
    pub actor_id: UserId,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// One sold item line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub stock_item_id: StockItemId,
    pub quantity: Quantity,
}

/// Lines of a sale applied as a deduction, a void reversal or a reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleStockLines {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub sale_id: SaleId,
    pub lines: Vec<SaleLine>,
    /// Void and reopen are usually system-generated and have no human actor.
    pub actor_id: Option<UserId>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Which sale-linked movement a set of lines represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleMovement {
    Deduct,
    Void,
    Reopen,
}

impl SaleMovement {
    pub fn reason(self) -> InventoryReason {
        match self {
            SaleMovement::Deduct => InventoryReason::Sale,
            SaleMovement::Void => InventoryReason::Void,
            SaleMovement::Reopen => InventoryReason::Reopen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    Receive(ReceiveStock),
    Waste(WasteStock),
    Correct(CorrectStock),
    Sale(SaleMovement, SaleStockLines),
}

impl InventoryCommand {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            InventoryCommand::Receive(c) => c.tenant_id,
            InventoryCommand::Waste(c) => c.tenant_id,
            InventoryCommand::Correct(c) => c.tenant_id,
            InventoryCommand::Sale(_, c) => c.tenant_id,
        }
    }

    pub fn branch_id(&self) -> BranchId {
        match self {
            InventoryCommand::Receive(c) => c.branch_id,
            InventoryCommand::Waste(c) => c.branch_id,
            InventoryCommand::Correct(c) => c.branch_id,
            InventoryCommand::Sale(_, c) => c.branch_id,
        }
    }

    /// Stock items touched by this command, in line order.
    pub fn stock_item_ids(&self) -> Vec<StockItemId> {
        match self {
            InventoryCommand::Receive(c) => vec![c.stock_item_id],
            InventoryCommand::Waste(c) => vec![c.stock_item_id],
            InventoryCommand::Correct(c) => vec![c.stock_item_id],
            InventoryCommand::Sale(_, c) => c.lines.iter().map(|l| l.stock_item_id).collect(),
        }
    }

    /// Whether the command requires the stock item(s) to be assigned to the branch.
    /// Sale-linked lines were validated by the sales module already.
    pub fn requires_branch_assignment(&self) -> bool {
        !matches!(self, InventoryCommand::Sale(..))
    }

    /// Validate and produce the signed entries to append.
    pub fn plan(&self, now: DateTime<Utc>) -> DomainResult<Vec<NewInventoryEntry>> {
        match self {
            InventoryCommand::Receive(c) => plan_receive(c, now).map(|e| vec![e]),
            InventoryCommand::Waste(c) => plan_waste(c, now).map(|e| vec![e]),
            InventoryCommand::Correct(c) => plan_correction(c, now).map(|e| vec![e]),
            InventoryCommand::Sale(kind, c) => plan_sale_lines(*kind, c, now),
        }
    }
}

fn required_note(note: &str, reason: InventoryReason) -> DomainResult<String> {
    let trimmed = note.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(
            ValidationReason::MissingNote,
            format!("a note is required for {reason}"),
        ));
    }
    Ok(trimmed.to_string())
}

fn optional_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string)
}

pub fn plan_receive(cmd: &ReceiveStock, now: DateTime<Utc>) -> DomainResult<NewInventoryEntry> {
    cmd.quantity.ensure_positive("received quantity")?;
    Ok(NewInventoryEntry {
        tenant_id: cmd.tenant_id,
        branch_id: cmd.branch_id,
        stock_item_id: cmd.stock_item_id,
        delta: cmd.quantity.value(),
        reason: InventoryReason::Receive,
        ref_sale_id: None,
        note: optional_note(cmd.note.as_deref()),
        actor_id: Some(cmd.actor_id),
        occurred_at: cmd.occurred_at.unwrap_or(now),
    })
}

pub fn plan_waste(cmd: &WasteStock, now: DateTime<Utc>) -> DomainResult<NewInventoryEntry> {
    cmd.quantity.ensure_positive("wasted quantity")?;
    let note = required_note(&cmd.note, InventoryReason::Waste)?;
    Ok(NewInventoryEntry {
        tenant_id: cmd.tenant_id,
        branch_id: cmd.branch_id,
        stock_item_id: cmd.stock_item_id,
        delta: -cmd.quantity.value(),
        reason: InventoryReason::Waste,
        ref_sale_id: None,
        note: Some(note),
        actor_id: Some(cmd.actor_id),
        occurred_at: cmd.occurred_at.unwrap_or(now),
    })
}

pub fn plan_correction(cmd: &CorrectStock, now: DateTime<Utc>) -> DomainResult<NewInventoryEntry> {
    if cmd.delta.is_zero() {
        return Err(DomainError::validation(
            ValidationReason::ZeroDelta,
            "correction delta cannot be zero",
        ));
    }
    Quantity::new(cmd.delta).ensure_representable("correction delta")?;
    let note = required_note(&cmd.note, InventoryReason::Correction)?;
    Ok(NewInventoryEntry {
        tenant_id: cmd.tenant_id,
        branch_id: cmd.branch_id,
        stock_item_id: cmd.stock_item_id,
        delta: cmd.delta,
        reason: InventoryReason::Correction,
        ref_sale_id: None,
        note: Some(note),
        actor_id: Some(cmd.actor_id),
        occurred_at: cmd.occurred_at.unwrap_or(now),
    })
}

/// All lines are validated before any entry is produced: one bad line rejects the lot.
pub fn plan_sale_lines(
    kind: SaleMovement,
    cmd: &SaleStockLines,
    now: DateTime<Utc>,
) -> DomainResult<Vec<NewInventoryEntry>> {
    if cmd.lines.is_empty() {
        return Err(DomainError::validation(
            ValidationReason::EmptyLines,
            format!("{} requires at least one line", kind.reason()),
        ));
    }
    for (idx, line) in cmd.lines.iter().enumerate() {
        line.quantity.ensure_positive(&format!("line {idx} quantity"))?;
    }

    let occurred_at = cmd.occurred_at.unwrap_or(now);
    let reason = kind.reason();

    Ok(cmd
        .lines
        .iter()
        .map(|line| {
            let qty = line.quantity.value();
            let delta = match kind {
                SaleMovement::Deduct | SaleMovement::Reopen => -qty,
                SaleMovement::Void => qty,
            };
            NewInventoryEntry {
                tenant_id: cmd.tenant_id,
                branch_id: cmd.branch_id,
                stock_item_id: line.stock_item_id,
                delta,
                reason,
                ref_sale_id: Some(cmd.sale_id),
                note: None,
                actor_id: cmd.actor_id,
                occurred_at,
            }
        })
        .collect())
}
