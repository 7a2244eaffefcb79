//! Customer model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub customer_id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Filter parameters for listing customers.
#[derive(Debug, Clone, Default)]
pub struct ListCustomersFilter {
    pub active_only: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
