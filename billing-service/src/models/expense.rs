//! Expense model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An operating expense recorded against a business unit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Expense {
    pub expense_id: Uuid,
    pub unit_id: Uuid,
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating an expense.
#[derive(Debug, Clone)]
pub struct CreateExpense {
    pub unit_id: Uuid,
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
}

/// Filter parameters for listing expenses.
#[derive(Debug, Clone, Default)]
pub struct ListExpensesFilter {
    pub unit_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
