//! Billing plans offered to merchants.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::id::PlanId;

/// Billing cadence of a plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    /// Length of one billing period. Months are 30 days, years 365.
    pub fn period(&self) -> Duration {
        match self {
            BillingInterval::Monthly => Duration::days(30),
            BillingInterval::Yearly => Duration::days(365),
        }
    }

    /// `(period_start, period_end)` for a subscription starting at `start`.
    pub fn period_from(&self, start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (start, start + self.period())
    }
}

/// A billing plan as resolved by the plan catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Price per period in the smallest currency unit.
    pub price_cents: u64,
    pub currency: String,
    pub interval: BillingInterval,
    pub active: bool,
}

impl Plan {
    /// Only active plans can be subscribed to.
    pub fn is_subscribable(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn monthly_period_is_thirty_days() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let (from, to) = BillingInterval::Monthly.period_from(start);
        assert_eq!(from, start);
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn yearly_period_is_365_days() {
        assert_eq!(BillingInterval::Yearly.period(), Duration::days(365));
    }
}
