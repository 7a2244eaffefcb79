//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice payment status.
///
/// Derived from the sum of approved payments against `amount_due`;
/// `PendingVerification` marks an invoice with an e-wallet payment awaiting
/// admin approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    PendingVerification,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::PendingVerification => "pending_verification",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "pending_verification" => InvoiceStatus::PendingVerification,
            _ => InvoiceStatus::Unpaid,
        }
    }
}

/// A billing-period record for one subscription.
///
/// `amount_due` is fixed at creation; invoices are never deleted once paid
/// against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub amount_due: Decimal,
    pub status: String,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub subscription_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
