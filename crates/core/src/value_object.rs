//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `CashAmounts`
/// holding the same USD and KHR figures are the same amount. To "modify" one,
/// build a new one (`a.try_add(&b, ..)`, `-a`).
///
/// ```ignore
/// let float = CashAmounts::usd(dec!(100.00));
/// let paid_in = CashAmounts::usd(dec!(50.00));
/// assert_eq!(float.try_add(&paid_in, "float")?, CashAmounts::usd(dec!(150.00)));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
