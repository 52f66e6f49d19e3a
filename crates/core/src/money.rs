//! Exact, decimal value objects for cash and stock quantities.
//!
//! Nothing in the ledger uses binary floating point: a variance has to be exact
//! to the smallest currency subunit.
//!
//! Every figure accepted at the boundary fits the storage columns: USD in
//! `NUMERIC(18, 2)`, KHR in `NUMERIC(18, 0)`, quantities in `NUMERIC(18, 4)`.
//! Aggregation is checked; an overflow is an invariant violation, never a panic.

use core::ops::Neg;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult, ValidationReason};
use crate::value_object::ValueObject;

/// Total significant digits of every ledger column.
const STORAGE_PRECISION: u32 = 18;

fn pow10(exp: u32) -> Decimal {
    Decimal::from(10_i64.pow(exp))
}

fn overflow(what: &str) -> DomainError {
    DomainError::invariant(format!("{what} overflowed"))
}

/// Checked sum of signed decimals; `what` names the figure in the error.
pub fn checked_sum(values: impl IntoIterator<Item = Decimal>, what: &str) -> DomainResult<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(v).ok_or_else(|| overflow(what))
    })
}

/// Currencies held in a cash drawer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Khr,
}

impl Currency {
    /// Number of fractional digits of the smallest subunit (cents for USD, none for riel).
    pub fn subunit_scale(self) -> u32 {
        match self {
            Currency::Usd => 2,
            Currency::Khr => 0,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Khr => "KHR",
        }
    }

    /// Exclusive bound on the absolute value of a single amount.
    pub fn magnitude_limit(self) -> Decimal {
        pow10(STORAGE_PRECISION - self.subunit_scale())
    }

    /// Reject amounts that cannot be represented in whole subunits, or that
    /// are too large for the column.
    pub fn ensure_representable(self, amount: Decimal) -> DomainResult<()> {
        if amount.abs() >= self.magnitude_limit() {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                format!(
                    "{} amount {amount} is out of range (limit {})",
                    self.code(),
                    self.magnitude_limit()
                ),
            ));
        }
        if amount.normalize().scale() > self.subunit_scale() {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                format!(
                    "{} amount {amount} has more than {} fractional digits",
                    self.code(),
                    self.subunit_scale()
                ),
            ));
        }
        Ok(())
    }
}

/// A pair of cash figures, one per drawer currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashAmounts {
    pub usd: Decimal,
    pub khr: Decimal,
}

impl ValueObject for CashAmounts {}

impl CashAmounts {
    pub const ZERO: CashAmounts = CashAmounts {
        usd: Decimal::ZERO,
        khr: Decimal::ZERO,
    };

    pub fn new(usd: Decimal, khr: Decimal) -> Self {
        Self { usd, khr }
    }

    pub fn usd(usd: Decimal) -> Self {
        Self {
            usd,
            khr: Decimal::ZERO,
        }
    }

    pub fn khr(khr: Decimal) -> Self {
        Self {
            usd: Decimal::ZERO,
            khr,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.usd.is_zero() && self.khr.is_zero()
    }

    pub fn is_negative_anywhere(&self) -> bool {
        self.usd < Decimal::ZERO || self.khr < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self {
            usd: self.usd.abs(),
            khr: self.khr.abs(),
        }
    }

    /// Both currencies respect their subunit precision.
    pub fn ensure_representable(&self) -> DomainResult<()> {
        Currency::Usd.ensure_representable(self.usd)?;
        Currency::Khr.ensure_representable(self.khr)
    }

    /// Non-negative in both currencies, not zero overall, and representable.
    pub fn ensure_positive(&self, what: &str) -> DomainResult<()> {
        self.ensure_representable()?;
        if self.is_negative_anywhere() || self.is_zero() {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                format!("{what} must be positive"),
            ));
        }
        Ok(())
    }

    /// Component-wise: `self` exceeds `limit` in either currency.
    pub fn exceeds(&self, limit: &CashAmounts) -> bool {
        self.usd > limit.usd || self.khr > limit.khr
    }

    pub fn checked_add(&self, rhs: &CashAmounts) -> Option<CashAmounts> {
        Some(CashAmounts::new(
            self.usd.checked_add(rhs.usd)?,
            self.khr.checked_add(rhs.khr)?,
        ))
    }

    pub fn checked_sub(&self, rhs: &CashAmounts) -> Option<CashAmounts> {
        Some(CashAmounts::new(
            self.usd.checked_sub(rhs.usd)?,
            self.khr.checked_sub(rhs.khr)?,
        ))
    }

    /// `self + rhs`; overflow is reported as an invariant violation on `what`.
    pub fn try_add(&self, rhs: &CashAmounts, what: &str) -> DomainResult<CashAmounts> {
        self.checked_add(rhs).ok_or_else(|| overflow(what))
    }

    pub fn try_sub(&self, rhs: &CashAmounts, what: &str) -> DomainResult<CashAmounts> {
        self.checked_sub(rhs).ok_or_else(|| overflow(what))
    }

    /// Split into (increases, decreases) as non-negative figures per currency.
    pub fn split_signed(&self) -> (CashAmounts, CashAmounts) {
        let pos = |d: Decimal| if d > Decimal::ZERO { d } else { Decimal::ZERO };
        let neg = |d: Decimal| if d < Decimal::ZERO { -d } else { Decimal::ZERO };
        (
            CashAmounts::new(pos(self.usd), pos(self.khr)),
            CashAmounts::new(neg(self.usd), neg(self.khr)),
        )
    }
}

impl Neg for CashAmounts {
    type Output = CashAmounts;

    fn neg(self) -> CashAmounts {
        CashAmounts::new(-self.usd, -self.khr)
    }
}

/// A stock quantity (unit-agnostic; may be fractional, e.g. kilograms).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl ValueObject for Quantity {}

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Fractional digits kept by the journal's `delta` column.
    pub const MAX_SCALE: u32 = 4;

    /// Exclusive bound on the absolute value of a single quantity or delta.
    pub fn magnitude_limit() -> Decimal {
        pow10(STORAGE_PRECISION - Self::MAX_SCALE)
    }

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Require a strictly positive, representable quantity.
    pub fn ensure_positive(&self, what: &str) -> DomainResult<()> {
        if !self.is_positive() {
            return Err(DomainError::validation(
                ValidationReason::NonPositiveQuantity,
                format!("{what} must be greater than zero (got {})", self.0),
            ));
        }
        self.ensure_representable(what)
    }

    /// At most [`Self::MAX_SCALE`] fractional digits and below
    /// [`Self::magnitude_limit`] in absolute value. The sign is not checked.
    pub fn ensure_representable(&self, what: &str) -> DomainResult<()> {
        if self.0.abs() >= Self::magnitude_limit() {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                format!("{what} {} is out of range (limit {})", self.0, Self::magnitude_limit()),
            ));
        }
        if self.0.normalize().scale() > Self::MAX_SCALE {
            return Err(DomainError::validation(
                ValidationReason::InvalidAmount,
                format!("{what} {} has more than {} fractional digits", self.0, Self::MAX_SCALE),
            ));
        }
        Ok(())
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use proptest::prelude::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn usd_rejects_sub_cent_amounts() {
        assert!(Currency::Usd.ensure_representable(d("1.25")).is_ok());
        assert!(Currency::Usd.ensure_representable(d("1.250")).is_ok());
        let err = Currency::Usd.ensure_representable(d("1.255")).unwrap_err();
        assert_eq!(err.validation_reason(), Some(ValidationReason::InvalidAmount));
    }

    #[test]
    fn khr_has_no_subunit() {
        assert!(Currency::Khr.ensure_representable(d("4000")).is_ok());
        assert!(Currency::Khr.ensure_representable(d("4000.5")).is_err());
    }

    #[test]
    fn split_signed_separates_in_and_out() {
        let a = CashAmounts::new(d("-20.00"), d("4000"));
        let (inc, dec) = a.split_signed();
        assert_eq!(inc, CashAmounts::khr(d("4000")));
        assert_eq!(dec, CashAmounts::usd(d("20.00")));
    }

    #[test]
    fn positive_amount_requires_some_value() {
        assert!(CashAmounts::ZERO.ensure_positive("amount").is_err());
        assert!(CashAmounts::new(d("1.00"), d("-1")).ensure_positive("amount").is_err());
        assert!(CashAmounts::khr(d("100")).ensure_positive("amount").is_ok());
    }

    #[test]
    fn quantity_must_be_positive() {
        assert!(Quantity::from(0).ensure_positive("qty").is_err());
        assert!(Quantity::from(-1).ensure_positive("qty").is_err());
        assert!(Quantity::new(d("0.5")).ensure_positive("qty").is_ok());
    }

    #[test]
    fn quantity_fits_the_journal_column() {
        assert!(Quantity::new(d("1.2345")).ensure_positive("qty").is_ok());
        assert!(Quantity::new(d("1.23450")).ensure_positive("qty").is_ok());
        assert!(Quantity::new(d("99999999999999.9999")).ensure_positive("qty").is_ok());

        for bad in ["0.00001", "1.23456", "100000000000000", "50000000000000000000000000000"] {
            let err = Quantity::new(d(bad)).ensure_positive("qty").unwrap_err();
            assert_eq!(err.validation_reason(), Some(ValidationReason::InvalidAmount), "{bad}");
        }
        assert!(Quantity::new(d("-100000000000000")).ensure_representable("delta").is_err());
    }

    #[test]
    fn amounts_fit_their_columns() {
        assert!(Currency::Usd.ensure_representable(d("9999999999999999.99")).is_ok());
        assert!(Currency::Usd.ensure_representable(d("10000000000000000")).is_err());
        assert!(Currency::Khr.ensure_representable(d("999999999999999999")).is_ok());
        assert!(Currency::Khr.ensure_representable(d("-1000000000000000000")).is_err());
    }

    #[test]
    fn aggregation_overflow_is_an_invariant_violation() {
        let huge = CashAmounts::usd(Decimal::MAX);
        assert!(huge.checked_add(&CashAmounts::usd(d("1"))).is_none());
        let err = huge.try_add(&huge, "expected cash").unwrap_err();
        assert_eq!(err.code(), "invariant_violation");

        let err = checked_sum([Decimal::MAX, Decimal::ONE], "on-hand").unwrap_err();
        assert_eq!(err.code(), "invariant_violation");
        assert_eq!(checked_sum([d("1.5"), d("-0.5")], "on-hand").unwrap(), d("1.0"));
    }

    proptest! {
        /// Bounded amounts never overflow when added or subtracted pairwise,
        /// and subtraction undoes addition.
        #[test]
        fn checked_arithmetic_round_trips(
            a in -9_999_999_999_999_999i64..9_999_999_999_999_999i64,
            b in -9_999_999_999_999_999i64..9_999_999_999_999_999i64,
            k in -999_999_999_999_999_999i64..999_999_999_999_999_999i64,
        ) {
            let x = CashAmounts::new(Decimal::new(a, 2), Decimal::from(k));
            let y = CashAmounts::new(Decimal::new(b, 2), Decimal::from(-k));
            let sum = x.checked_add(&y).unwrap();
            prop_assert_eq!(sum.checked_sub(&y).unwrap(), x);
            prop_assert!(sum.khr.is_zero());
        }
    }
}
