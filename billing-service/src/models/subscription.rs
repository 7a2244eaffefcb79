//! Subscription model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::billing::AnchorDay;

/// One customer's service connection to one plan at one business unit.
///
/// `balance` is the signed running total (positive = owed, negative =
/// credit) and is only ever written by the reconciliation and adjustment
/// paths in the database layer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub unit_id: Uuid,
    pub pppoe_name: String,
    pub is_active: bool,
    pub billing_anchor_day: i32,
    pub balance: Decimal,
    pub installation_date: NaiveDate,
    pub current_period_start: NaiveDate,
    pub current_period_end: NaiveDate,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    /// Stored anchor day as the typed enum.
    pub fn anchor(&self) -> AnchorDay {
        AnchorDay::from_day(self.billing_anchor_day).unwrap_or(AnchorDay::Fifteenth)
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub unit_id: Uuid,
    pub pppoe_name: String,
    pub pppoe_password: String,
    pub billing_anchor_day: i32,
    pub installation_date: NaiveDate,
}

/// Filter parameters for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct ListSubscriptionsFilter {
    pub customer_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub active_only: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
