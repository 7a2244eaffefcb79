//! Signed balance-adjustment ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why a balance adjustment was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    PlanChangeCredit,
    OverpaymentCredit,
    Manual,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::PlanChangeCredit => "plan_change_credit",
            AdjustmentReason::OverpaymentCredit => "overpayment_credit",
            AdjustmentReason::Manual => "manual",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "plan_change_credit" => AdjustmentReason::PlanChangeCredit,
            "overpayment_credit" => AdjustmentReason::OverpaymentCredit,
            _ => AdjustmentReason::Manual,
        }
    }
}

/// A signed ledger entry against a subscription balance.
///
/// Negative amounts are credits to the customer. Plan changes whose net
/// proration is negative land here rather than as a negative invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceAdjustment {
    pub adjustment_id: Uuid,
    pub subscription_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
}
