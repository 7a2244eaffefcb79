//! Request and response shapes for the HTTP API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::billing::ProrationResult;
use crate::models::{
    BalanceAdjustment, Customer, Expense, Invoice, InvoiceStatus, Payment, PaymentMethod,
    Subscription, VerificationStatus,
};
use crate::services::database::{BillingRunSummary, PaymentOutcome, VerificationOutcome};
use crate::services::operations::{ActivationResult, PlanChangeResult, SuspensionResult};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBusinessUnitRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub monthly_fee: Decimal,
    #[validate(length(min = 1, max = 64))]
    pub router_profile: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub monthly_fee: Option<Decimal>,
    #[validate(length(min = 1, max = 64))]
    pub router_profile: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub pppoe_name: String,
    #[validate(length(min = 1, max = 64))]
    pub pppoe_password: String,
    /// Must be 15 or 30; checked against the supported anchor days when the
    /// subscription is created.
    pub billing_anchor_day: i32,
    pub installation_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct PlanChangeRequest {
    pub new_plan_id: Uuid,
    /// Defaults to today when omitted.
    pub change_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub subscription_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    /// Defaults to today when omitted.
    pub paid_date: Option<NaiveDate>,
    pub method: PaymentMethod,
    pub gateway_reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExpenseRequest {
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct BillingRunRequest {
    /// Defaults to today when omitted.
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ManualAdjustmentRequest {
    pub amount: Decimal,
    pub description: Option<String>,
}

// =============================================================================
// List query parameters
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListCustomersQuery {
    pub active_only: Option<bool>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPlansQuery {
    pub include_inactive: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSubscriptionsQuery {
    pub customer_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub active_only: Option<bool>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListInvoicesQuery {
    pub subscription_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPaymentsQuery {
    pub subscription_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub verification: Option<VerificationStatus>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListExpensesQuery {
    pub unit_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

// =============================================================================
// Responses
// =============================================================================

/// Proration math for a plan change, as shown in previews and results.
#[derive(Debug, Serialize)]
pub struct ProrationResponse {
    pub credit: Decimal,
    pub charge: Decimal,
    pub net: Decimal,
    pub days_remaining: i64,
    pub days_in_period: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub description: String,
}

impl From<ProrationResult> for ProrationResponse {
    fn from(p: ProrationResult) -> Self {
        Self {
            credit: p.credit,
            charge: p.charge,
            net: p.net,
            days_remaining: p.days_remaining,
            days_in_period: p.days_in_period,
            period_start: p.period.start,
            period_end: p.period.end,
            description: p.description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub subscription: Subscription,
    pub invoice: Option<Invoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_warning: Option<String>,
}

impl From<ActivationResult> for ActivationResponse {
    fn from(r: ActivationResult) -> Self {
        Self {
            subscription: r.subscription,
            invoice: r.invoice,
            router_warning: r.router_warning,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanChangeResponse {
    pub subscription: Subscription,
    pub proration: ProrationResponse,
    pub invoice: Option<Invoice>,
    pub adjustment: Option<BalanceAdjustment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_warning: Option<String>,
}

impl From<PlanChangeResult> for PlanChangeResponse {
    fn from(r: PlanChangeResult) -> Self {
        Self {
            subscription: r.record.subscription,
            proration: r.record.proration.into(),
            invoice: r.record.invoice,
            adjustment: r.record.adjustment,
            router_warning: r.router_warning,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SuspensionResponse {
    pub subscription: Subscription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_warning: Option<String>,
}

impl From<SuspensionResult> for SuspensionResponse {
    fn from(r: SuspensionResult) -> Self {
        Self {
            subscription: r.subscription,
            router_warning: r.router_warning,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
    /// Overpayment credit created by this payment (zero or negative).
    pub spillover_credit: Decimal,
}

impl From<PaymentOutcome> for PaymentResponse {
    fn from(o: PaymentOutcome) -> Self {
        Self {
            payment: o.payment,
            invoice: o.invoice,
            spillover_credit: o.spillover,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
    /// False when the payment was already terminal and nothing changed.
    pub applied: bool,
}

impl From<VerificationOutcome> for VerificationResponse {
    fn from(o: VerificationOutcome) -> Self {
        Self {
            payment: o.payment,
            invoice: o.invoice,
            applied: o.applied,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BillingRunFailureResponse {
    pub subscription_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BillingRunResponse {
    pub generated: usize,
    pub failed: usize,
    pub invoices: Vec<Invoice>,
    pub failures: Vec<BillingRunFailureResponse>,
}

impl From<BillingRunSummary> for BillingRunResponse {
    fn from(s: BillingRunSummary) -> Self {
        Self {
            generated: s.invoices.len(),
            failed: s.failures.len(),
            invoices: s.invoices,
            failures: s
                .failures
                .into_iter()
                .map(|f| BillingRunFailureResponse {
                    subscription_id: f.subscription_id,
                    error: f.error,
                })
                .collect(),
        }
    }
}

/// Everything a customer sees on their portal page.
#[derive(Debug, Serialize)]
pub struct PortalOverviewResponse {
    pub customer: Customer,
    pub subscriptions: Vec<Subscription>,
    pub invoices: Vec<Invoice>,
}

/// Portal request to pay an invoice through the e-wallet gateway.
#[derive(Debug, Deserialize, Validate)]
pub struct PortalChargeRequest {
    /// The customer's saved payment source at the gateway.
    #[validate(length(min = 1, max = 100))]
    pub source_id: String,
}

#[derive(Debug, Serialize)]
pub struct PortalChargeResponse {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
    pub charge_id: String,
    pub charge_status: String,
}

#[derive(Debug, Serialize)]
pub struct ExpenseListResponse {
    pub expenses: Vec<Expense>,
    pub total: Decimal,
}
