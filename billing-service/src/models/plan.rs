//! Service plan model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named service tier with a fixed monthly fee.
///
/// `router_profile` names the RouterOS PPPoE profile that subscriptions on
/// this plan are provisioned with.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: Uuid,
    pub name: String,
    pub monthly_fee: Decimal,
    pub router_profile: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub name: String,
    pub monthly_fee: Decimal,
    pub router_profile: String,
}

/// Input for updating a plan.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub monthly_fee: Option<Decimal>,
    pub router_profile: Option<String>,
}
