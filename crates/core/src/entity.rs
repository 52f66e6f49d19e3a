//! Entity trait: identity + continuity across state changes.
//!
//! Ledger entries are entities too, but immutable ones: their identity is the
//! only thing that ever correlates them (e.g. from an event payload).

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
