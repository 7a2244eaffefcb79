//! Prorated plan-change calculation.
//!
//! Day-count convention: the change date is inclusive and the period end is
//! exclusive, so `days_remaining = period_end - change_date`. A change on
//! the period end itself yields zero proration.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use super::period::{current_period, AnchorDay, BillingPeriod};

/// Round a monetary amount to 2 decimal places, half-up.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Outcome of a proration calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationResult {
    /// Credit for the unused portion of the old plan.
    pub credit: Decimal,
    /// Charge for the remaining portion of the new plan.
    pub charge: Decimal,
    /// `charge - credit`; negative means a credit to the customer.
    pub net: Decimal,
    pub days_remaining: i64,
    pub days_in_period: i64,
    pub period: BillingPeriod,
    pub description: String,
}

impl ProrationResult {
    pub fn is_credit(&self) -> bool {
        self.net < Decimal::ZERO
    }

    pub fn is_charge(&self) -> bool {
        self.net > Decimal::ZERO
    }
}

/// Prorate a plan change against an explicit billing period.
///
/// Rejects change dates outside `[period.start, period.end]` rather than
/// clamping them.
pub fn prorate(
    old_fee: Decimal,
    new_fee: Decimal,
    period: &BillingPeriod,
    change_date: NaiveDate,
) -> Result<ProrationResult, AppError> {
    if change_date < period.start || change_date > period.end {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Change date {} is outside the billing period {} to {}",
            change_date,
            period.start,
            period.end
        )));
    }

    let days_in_period = period.days();
    if days_in_period <= 0 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Billing period {} to {} is empty",
            period.start,
            period.end
        )));
    }

    let days_remaining = (period.end - change_date).num_days();
    let factor = Decimal::from(days_remaining) / Decimal::from(days_in_period);

    let credit = round_money(old_fee * factor);
    let charge = round_money(new_fee * factor);
    let net = charge - credit;

    Ok(ProrationResult {
        credit,
        charge,
        net,
        days_remaining,
        days_in_period,
        period: *period,
        description: format!(
            "Plan change on {}: {} of {} days remaining",
            change_date, days_remaining, days_in_period
        ),
    })
}

/// Prorate a plan change occurring on `change_date`, deriving the billing
/// period from the subscription's anchor day.
pub fn preview_plan_change(
    old_fee: Decimal,
    new_fee: Decimal,
    anchor: AnchorDay,
    change_date: NaiveDate,
) -> Result<ProrationResult, AppError> {
    let period = current_period(anchor, change_date);
    prorate(old_fee, new_fee, &period, change_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn money(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn mid_period_upgrade_matches_reference_figures() {
        // 30-day period ending on the 15th, change on the 10th.
        let period = BillingPeriod {
            start: d(2026, 6, 15),
            end: d(2026, 7, 15),
        };
        let result = prorate(money("1000"), money("1500"), &period, d(2026, 7, 10)).unwrap();

        assert_eq!(result.days_in_period, 30);
        assert_eq!(result.days_remaining, 5);
        assert_eq!(result.credit, money("166.67"));
        assert_eq!(result.charge, money("250.00"));
        assert_eq!(result.net, money("83.33"));
        assert!(result.is_charge());
    }

    #[test]
    fn downgrade_yields_negative_net() {
        let period = BillingPeriod {
            start: d(2026, 6, 15),
            end: d(2026, 7, 15),
        };
        let result = prorate(money("1500"), money("1000"), &period, d(2026, 7, 10)).unwrap();

        assert_eq!(result.net, money("-83.33"));
        assert!(result.is_credit());
    }

    #[test]
    fn change_on_period_end_is_zero() {
        let period = BillingPeriod {
            start: d(2026, 6, 15),
            end: d(2026, 7, 15),
        };
        let result = prorate(money("1000"), money("1500"), &period, d(2026, 7, 15)).unwrap();

        assert_eq!(result.days_remaining, 0);
        assert_eq!(result.credit, Decimal::ZERO);
        assert_eq!(result.charge, Decimal::ZERO);
        assert_eq!(result.net, Decimal::ZERO);
    }

    #[test]
    fn change_on_period_start_is_full_period() {
        let period = BillingPeriod {
            start: d(2026, 6, 15),
            end: d(2026, 7, 15),
        };
        let result = prorate(money("1000"), money("1500"), &period, d(2026, 6, 15)).unwrap();

        assert_eq!(result.days_remaining, result.days_in_period);
        assert_eq!(result.credit, money("1000.00"));
        assert_eq!(result.charge, money("1500.00"));
    }

    #[test]
    fn change_beyond_period_end_is_rejected() {
        let period = BillingPeriod {
            start: d(2026, 6, 15),
            end: d(2026, 7, 15),
        };
        let result = prorate(money("1000"), money("1500"), &period, d(2026, 7, 16));
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn change_before_period_start_is_rejected() {
        let period = BillingPeriod {
            start: d(2026, 6, 15),
            end: d(2026, 7, 15),
        };
        let result = prorate(money("1000"), money("1500"), &period, d(2026, 6, 14));
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn zero_fee_delta_nets_to_zero() {
        let result =
            preview_plan_change(money("1000"), money("1000"), AnchorDay::Fifteenth, d(2026, 8, 10))
                .unwrap();
        assert_eq!(result.net, Decimal::ZERO);
    }

    #[test]
    fn preview_derives_period_from_anchor() {
        let result =
            preview_plan_change(money("1000"), money("1500"), AnchorDay::Fifteenth, d(2026, 7, 10))
                .unwrap();
        // June 15 to July 15 is a 30-day period.
        assert_eq!(result.days_in_period, 30);
        assert_eq!(result.days_remaining, 5);
        assert_eq!(result.net, money("83.33"));
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_money(money("166.665")), money("166.67"));
        assert_eq!(round_money(money("166.664")), money("166.66"));
        assert_eq!(round_money(money("-83.335")), money("-83.34"));
    }
}
