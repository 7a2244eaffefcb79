//! Payment model and verification lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    EWallet,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::EWallet => "e_wallet",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "e_wallet" => PaymentMethod::EWallet,
            "bank_transfer" => PaymentMethod::BankTransfer,
            _ => PaymentMethod::Cash,
        }
    }
}

/// Verification state of a payment.
///
/// `Pending` payments (e-wallet charges awaiting admin review) have no
/// effect on balance or invoice status. `Approved` and `Rejected` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending" => VerificationStatus::Pending,
            "rejected" => VerificationStatus::Rejected,
            _ => VerificationStatus::Approved,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }

    /// Valid transitions: Pending -> Approved, Pending -> Rejected.
    pub fn can_transition_to(&self, next: VerificationStatus) -> bool {
        matches!(
            (self, next),
            (
                VerificationStatus::Pending,
                VerificationStatus::Approved | VerificationStatus::Rejected
            )
        )
    }
}

/// A settlement record linked to a subscription and optionally one invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub subscription_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub paid_date: NaiveDate,
    pub method: String,
    pub verification: String,
    pub gateway_reference: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub subscription_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub paid_date: NaiveDate,
    pub method: PaymentMethod,
    pub gateway_reference: Option<String>,
    pub notes: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub subscription_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub verification: Option<VerificationStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_reach_both_terminal_states() {
        assert!(VerificationStatus::Pending.can_transition_to(VerificationStatus::Approved));
        assert!(VerificationStatus::Pending.can_transition_to(VerificationStatus::Rejected));
    }

    #[test]
    fn terminal_states_cannot_transition() {
        for terminal in [VerificationStatus::Approved, VerificationStatus::Rejected] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(VerificationStatus::Approved));
            assert!(!terminal.can_transition_to(VerificationStatus::Rejected));
            assert!(!terminal.can_transition_to(VerificationStatus::Pending));
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            VerificationStatus::Pending,
            VerificationStatus::Approved,
            VerificationStatus::Rejected,
        ] {
            assert_eq!(VerificationStatus::from_string(status.as_str()), status);
        }
    }
}
