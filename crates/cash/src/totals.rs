use serde::{Deserialize, Serialize};

use tallyline_core::{CashAmounts, DomainResult};

use crate::movement::CashMovement;

/// Derived drawer figures for one session. Recomputed from the movements on
/// every call; never stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub opening_float: CashAmounts,
    pub total_cash_in: CashAmounts,
    pub total_cash_out: CashAmounts,
    pub net_cash_flow: CashAmounts,
    pub expected_cash: CashAmounts,
}

impl SessionTotals {
    /// Aggregate signed movement amounts on top of an opening float.
    pub fn from_amounts(
        opening_float: CashAmounts,
        amounts: impl IntoIterator<Item = CashAmounts>,
    ) -> DomainResult<Self> {
        let mut cash_in = CashAmounts::ZERO;
        let mut cash_out = CashAmounts::ZERO;
        for amount in amounts {
            let (inc, dec) = amount.split_signed();
            cash_in = cash_in.try_add(&inc, "total cash in")?;
            cash_out = cash_out.try_add(&dec, "total cash out")?;
        }
        Self::from_flows(opening_float, cash_in, cash_out)
    }

    /// Build from already-aggregated inflow and outflow (both non-negative).
    pub fn from_flows(
        opening_float: CashAmounts,
        cash_in: CashAmounts,
        cash_out: CashAmounts,
    ) -> DomainResult<Self> {
        let net = cash_in.try_sub(&cash_out, "net cash flow")?;
        Ok(Self {
            opening_float,
            total_cash_in: cash_in,
            total_cash_out: cash_out,
            net_cash_flow: net,
            expected_cash: opening_float.try_add(&net, "expected cash")?,
        })
    }

    pub fn from_movements<'a>(
        opening_float: CashAmounts,
        movements: impl IntoIterator<Item = &'a CashMovement>,
    ) -> DomainResult<Self> {
        Self::from_amounts(opening_float, movements.into_iter().map(|m| m.amount))
    }

    /// `counted - expected`, per currency.
    pub fn variance(&self, counted: &CashAmounts) -> DomainResult<CashAmounts> {
        counted.try_sub(&self.expected_cash, "variance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    #[test]
    fn expected_is_float_plus_net() {
        let totals = SessionTotals::from_amounts(
            CashAmounts::usd(Decimal::new(10000, 2)),
            [
                CashAmounts::usd(Decimal::new(5000, 2)),
                CashAmounts::usd(Decimal::new(-2000, 2)),
            ],
        )
        .unwrap();
        assert_eq!(totals.total_cash_in.usd, Decimal::new(5000, 2));
        assert_eq!(totals.total_cash_out.usd, Decimal::new(2000, 2));
        assert_eq!(totals.expected_cash.usd, Decimal::new(13000, 2));
        assert_eq!(
            totals
                .variance(&CashAmounts::usd(Decimal::new(12800, 2)))
                .unwrap()
                .usd,
            Decimal::new(-200, 2)
        );
    }

    #[test]
    fn currencies_never_mix() {
        let totals = SessionTotals::from_amounts(
            CashAmounts::ZERO,
            [CashAmounts::new(Decimal::from(1), Decimal::from(-4000))],
        )
        .unwrap();
        assert_eq!(totals.total_cash_in, CashAmounts::usd(Decimal::from(1)));
        assert_eq!(totals.total_cash_out, CashAmounts::khr(Decimal::from(4000)));
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let huge = CashAmounts::usd(Decimal::MAX);
        let err = SessionTotals::from_amounts(CashAmounts::ZERO, [huge, huge]).unwrap_err();
        assert_eq!(err.code(), "invariant_violation");

        let err = SessionTotals::from_amounts(huge, [huge]).unwrap_err();
        assert_eq!(err.code(), "invariant_violation");

        let totals = SessionTotals::from_amounts(CashAmounts::ZERO, [huge]).unwrap();
        assert!(totals.variance(&-huge).is_err());
    }

    proptest! {
        /// Order of movements never changes the totals.
        #[test]
        fn totals_are_order_independent(
            cents in prop::collection::vec(-100_000i64..100_000i64, 0..40)
        ) {
            let amounts: Vec<CashAmounts> = cents
                .iter()
                .map(|c| CashAmounts::usd(Decimal::new(*c, 2)))
                .collect();
            let mut reversed = amounts.clone();
            reversed.reverse();

            let a = SessionTotals::from_amounts(CashAmounts::ZERO, amounts).unwrap();
            let b = SessionTotals::from_amounts(CashAmounts::ZERO, reversed).unwrap();
            prop_assert_eq!(a, b);
            prop_assert_eq!(
                a.net_cash_flow.usd,
                cents.iter().map(|c| Decimal::new(*c, 2)).sum::<Decimal>()
            );
        }
    }
}
