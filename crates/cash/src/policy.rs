use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyline_core::CashAmounts;

/// Per-tenant cash drawer rules, supplied by the policy port.
///
/// `Default` is what applies when a tenant has no policy row: refunds need a
/// manager, manual adjustments are off, and any non-zero variance is reviewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSessionPolicies {
    pub require_session_for_sales: bool,
    pub allow_paid_out: bool,
    pub require_refund_approval: bool,
    pub allow_manual_adjustment: bool,
    /// Per-movement ceiling for paid-outs, per currency.
    pub paid_out_limit: Option<CashAmounts>,
    /// Closing variances whose absolute value exceeds this go to review.
    pub variance_review_threshold: CashAmounts,
}

impl Default for CashSessionPolicies {
    fn default() -> Self {
        Self {
            require_session_for_sales: true,
            allow_paid_out: true,
            require_refund_approval: true,
            allow_manual_adjustment: false,
            paid_out_limit: None,
            variance_review_threshold: CashAmounts::ZERO,
        }
    }
}

impl CashSessionPolicies {
    pub fn with_paid_out_limit(mut self, limit: CashAmounts) -> Self {
        self.paid_out_limit = Some(limit);
        self
    }

    pub fn with_variance_review_threshold(mut self, threshold: CashAmounts) -> Self {
        self.variance_review_threshold = threshold;
        self
    }

    pub fn allowing_adjustments(mut self) -> Self {
        self.allow_manual_adjustment = true;
        self
    }

    /// Whether a closing variance must be looked at by a manager.
    pub fn variance_needs_review(&self, variance: &CashAmounts) -> bool {
        let v = variance.abs();
        let t = self.variance_review_threshold.abs();
        v.usd > t.usd || v.khr > t.khr
    }
}

/// Convenience for thresholds expressed in USD only.
pub fn usd_threshold(usd: Decimal) -> CashAmounts {
    CashAmounts::usd(usd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_review_any_variance() {
        let p = CashSessionPolicies::default();
        assert!(p.require_refund_approval);
        assert!(!p.allow_manual_adjustment);
        assert!(!p.variance_needs_review(&CashAmounts::ZERO));
        assert!(p.variance_needs_review(&CashAmounts::khr(Decimal::from(-100))));
    }

    #[test]
    fn threshold_is_inclusive() {
        let p = CashSessionPolicies::default().with_variance_review_threshold(usd_threshold(
            Decimal::new(500, 2),
        ));
        assert!(!p.variance_needs_review(&CashAmounts::usd(Decimal::new(-500, 2))));
        assert!(p.variance_needs_review(&CashAmounts::usd(Decimal::new(501, 2))));
    }
}
