use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyline_core::{
    BranchId, DomainError, DomainResult, Entity, LedgerEntryId, SaleId, StockItemId, TenantId,
    UserId, checked_sum,
};

/// Why stock moved. The reason fixes the sign of the entry's delta.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryReason {
    Receive,
    Waste,
    Correction,
    Sale,
    Void,
    Reopen,
}

impl InventoryReason {
    pub const ALL: [InventoryReason; 6] = [
        InventoryReason::Receive,
        InventoryReason::Waste,
        InventoryReason::Correction,
        InventoryReason::Sale,
        InventoryReason::Void,
        InventoryReason::Reopen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InventoryReason::Receive => "receive",
            InventoryReason::Waste => "waste",
            InventoryReason::Correction => "correction",
            InventoryReason::Sale => "sale",
            InventoryReason::Void => "void",
            InventoryReason::Reopen => "reopen",
        }
    }

    /// Waste and corrections must explain themselves.
    pub fn requires_note(self) -> bool {
        matches!(self, InventoryReason::Waste | InventoryReason::Correction)
    }

    /// Entries that exist only because of a sale carry its id.
    pub fn is_sale_linked(self) -> bool {
        matches!(
            self,
            InventoryReason::Sale | InventoryReason::Void | InventoryReason::Reopen
        )
    }
}

impl core::fmt::Display for InventoryReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InventoryReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InventoryReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DomainError::invariant(format!("unknown inventory reason '{s}'")))
    }
}

/// An inventory journal entry that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInventoryEntry {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub stock_item_id: StockItemId,
    /// Signed: positive increases on-hand, negative decreases it.
    pub delta: Decimal,
    pub reason: InventoryReason,
    pub ref_sale_id: Option<SaleId>,
    pub note: Option<String>,
    pub actor_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// A stored inventory journal entry. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: LedgerEntryId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub stock_item_id: StockItemId,
    pub delta: Decimal,
    pub reason: InventoryReason,
    pub ref_sale_id: Option<SaleId>,
    pub note: Option<String>,
    pub actor_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl InventoryEntry {
    /// Materialize a new entry with its storage-assigned id and write time.
    pub fn from_new(new: NewInventoryEntry, id: LedgerEntryId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id: new.tenant_id,
            branch_id: new.branch_id,
            stock_item_id: new.stock_item_id,
            delta: new.delta,
            reason: new.reason,
            ref_sale_id: new.ref_sale_id,
            note: new.note,
            actor_id: new.actor_id,
            occurred_at: new.occurred_at,
            created_at,
        }
    }
}

impl Entity for InventoryEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Read filters for a subject's journal. All filters are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalFilter {
    pub reason: Option<InventoryReason>,
    pub ref_sale_id: Option<SaleId>,
    pub occurred_from: Option<DateTime<Utc>>,
    pub occurred_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl JournalFilter {
    pub fn matches(&self, entry: &InventoryEntry) -> bool {
        self.reason.is_none_or(|r| entry.reason == r)
            && self.ref_sale_id.is_none_or(|s| entry.ref_sale_id == Some(s))
            && self.occurred_from.is_none_or(|t| entry.occurred_at >= t)
            && self.occurred_to.is_none_or(|t| entry.occurred_at <= t)
    }
}

/// Pure sum of deltas. The only way a balance is ever computed.
pub fn sum_deltas<'a>(
    entries: impl IntoIterator<Item = &'a InventoryEntry>,
) -> DomainResult<Decimal> {
    checked_sum(entries.into_iter().map(|e| e.delta), "on-hand balance")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_parses_its_own_name() {
        for r in InventoryReason::ALL {
            assert_eq!(r.as_str().parse::<InventoryReason>().unwrap(), r);
        }
        assert!("gift".parse::<InventoryReason>().is_err());
    }

    #[test]
    fn only_waste_and_correction_need_notes() {
        let needing: Vec<_> = InventoryReason::ALL
            .into_iter()
            .filter(|r| r.requires_note())
            .collect();
        assert_eq!(needing, vec![InventoryReason::Waste, InventoryReason::Correction]);
    }

    fn entry(delta: Decimal) -> InventoryEntry {
        InventoryEntry::from_new(
            NewInventoryEntry {
                tenant_id: TenantId::new(),
                branch_id: BranchId::new(),
                stock_item_id: StockItemId::new(),
                delta,
                reason: InventoryReason::Correction,
                ref_sale_id: None,
                note: Some("count".into()),
                actor_id: None,
                occurred_at: Utc::now(),
            },
            LedgerEntryId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn balance_is_the_sum_of_deltas() {
        let entries = [entry(Decimal::from(5)), entry(Decimal::new(-25, 1))];
        assert_eq!(sum_deltas(&entries).unwrap(), Decimal::new(25, 1));
        assert_eq!(sum_deltas(&[]).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn balance_overflow_is_an_error() {
        let entries = [entry(Decimal::MAX), entry(Decimal::MAX)];
        let err = sum_deltas(&entries).unwrap_err();
        assert_eq!(err.code(), "invariant_violation");
    }
}
