//! Billing orchestration.
//!
//! Composes the transactional database operations with router provisioning
//! and metrics. Money always commits first; router sync runs after commit
//! and a router failure downgrades to a warning on the response instead of
//! rolling anything back.

use crate::billing::ProrationResult;
use crate::models::{CreateSubscription, Invoice, RecordPayment, Subscription};
use crate::services::database::{
    BillingRunSummary, Database, PaymentOutcome, PlanChangeRecord, VerificationOutcome,
};
use crate::services::metrics;
use crate::services::mikrotik::{MikrotikClient, NewRouterAccount};
use chrono::NaiveDate;
use service_core::error::AppError;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Result of a plan change, including any router sync warning.
#[derive(Debug)]
pub struct PlanChangeResult {
    pub record: PlanChangeRecord,
    pub router_warning: Option<String>,
}

/// Result of activating a subscription.
#[derive(Debug)]
pub struct ActivationResult {
    pub subscription: Subscription,
    pub invoice: Option<Invoice>,
    pub router_warning: Option<String>,
}

/// Result of suspending a subscription.
#[derive(Debug)]
pub struct SuspensionResult {
    pub subscription: Subscription,
    pub router_warning: Option<String>,
}

/// Orchestrates billing flows across the database and the router.
#[derive(Clone)]
pub struct BillingOps {
    db: Database,
    router: MikrotikClient,
}

impl BillingOps {
    pub fn new(db: Database, router: MikrotikClient) -> Self {
        Self { db, router }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a subscription, generate its activation invoice, and
    /// provision the PPPoE account on the router.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn activate_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<ActivationResult, AppError> {
        let (subscription, invoice) = self.db.create_subscription_with_activation(input).await?;

        if invoice.is_some() {
            metrics::record_invoice_generated("activation");
        }

        let plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let account = NewRouterAccount {
            name: input.pppoe_name.clone(),
            password: input.pppoe_password.clone(),
            service: "pppoe".to_string(),
            profile: plan.router_profile.clone(),
            comment: Some(format!("subscription:{}", subscription.subscription_id)),
        };

        let router_warning = match self.router.add_account(&account).await {
            Ok(()) => None,
            Err(e) => {
                metrics::record_router_sync_failure("add_account");
                warn!(
                    subscription_id = %subscription.subscription_id,
                    error = %e,
                    "Router provisioning failed after activation"
                );
                Some(format!(
                    "Subscription activated but router provisioning failed: {}",
                    e
                ))
            }
        };

        Ok(ActivationResult {
            subscription,
            invoice,
            router_warning,
        })
    }

    /// Preview the proration of a plan change without committing anything.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn preview_plan_change(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
        change_date: NaiveDate,
    ) -> Result<ProrationResult, AppError> {
        let subscription = self
            .db
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;
        let old_plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Current plan not found")))?;
        let new_plan = self
            .db
            .get_plan(new_plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("New plan not found")))?;

        crate::billing::preview_plan_change(
            old_plan.monthly_fee,
            new_plan.monthly_fee,
            subscription.anchor(),
            change_date,
        )
    }

    /// Commit a prorated plan change and move the router account to the new
    /// plan's profile.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn process_plan_change(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
        change_date: NaiveDate,
    ) -> Result<PlanChangeResult, AppError> {
        let record = match self
            .db
            .change_plan_prorated(subscription_id, new_plan_id, change_date)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                metrics::record_plan_change("failed");
                return Err(e);
            }
        };

        metrics::record_plan_change("committed");
        if record.invoice.is_some() {
            metrics::record_invoice_generated("plan_change");
        }

        let new_plan = self
            .db
            .get_plan(new_plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("New plan not found")))?;

        let router_warning = match self
            .router
            .update_profile(&record.subscription.pppoe_name, &new_plan.router_profile)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                metrics::record_router_sync_failure("update_profile");
                warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Router profile sync failed after plan change"
                );
                Some(format!(
                    "Plan change committed but router sync failed: {}",
                    e
                ))
            }
        };

        Ok(PlanChangeResult {
            record,
            router_warning,
        })
    }

    /// Deactivate a subscription and disable its router account.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn suspend_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<SuspensionResult, AppError> {
        let subscription = self
            .db
            .deactivate_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Subscription not found or already inactive"))
            })?;

        let router_warning = match self.router.disable_account(&subscription.pppoe_name).await {
            Ok(()) => None,
            Err(e) => {
                metrics::record_router_sync_failure("disable_account");
                warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Router disable failed after suspension"
                );
                Some(format!(
                    "Subscription deactivated but router disable failed: {}",
                    e
                ))
            }
        };

        Ok(SuspensionResult {
            subscription,
            router_warning,
        })
    }

    /// Record a payment and reconcile it against its invoice.
    #[instrument(skip(self, input), fields(subscription_id = %input.subscription_id))]
    pub async fn record_payment(&self, input: &RecordPayment) -> Result<PaymentOutcome, AppError> {
        let outcome = match self.db.record_payment(input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_payment_operation(input.method.as_str(), "failed");
                return Err(e);
            }
        };

        metrics::record_payment_operation(input.method.as_str(), "recorded");
        Ok(outcome)
    }

    /// Approve a pending payment and apply it.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn approve_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<VerificationOutcome, AppError> {
        let outcome = self.db.approve_payment(payment_id).await?;
        if outcome.applied {
            metrics::record_payment_operation(&outcome.payment.method, "approved");
        }
        Ok(outcome)
    }

    /// Reject a pending payment.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn reject_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<VerificationOutcome, AppError> {
        let outcome = self.db.reject_payment(payment_id).await?;
        if outcome.applied {
            metrics::record_payment_operation(&outcome.payment.method, "rejected");
        }
        Ok(outcome)
    }

    /// Settle a gateway charge reported via webhook by approving the
    /// matching pending payment.
    #[instrument(skip(self))]
    pub async fn settle_gateway_charge(
        &self,
        charge_id: &str,
    ) -> Result<VerificationOutcome, AppError> {
        let payment = self
            .db
            .find_payment_by_reference(charge_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No payment recorded for gateway charge {}",
                    charge_id
                ))
            })?;

        self.approve_payment(payment.payment_id).await
    }

    /// Run the billing cycle for every subscription whose period has ended.
    #[instrument(skip(self))]
    pub async fn run_billing_cycle(
        &self,
        today: NaiveDate,
    ) -> Result<BillingRunSummary, AppError> {
        let summary = self.db.run_billing_cycle(today).await?;
        for _ in &summary.invoices {
            metrics::record_invoice_generated("billing_run");
        }
        for failure in &summary.failures {
            metrics::record_error("billing_run", "bill_subscription");
            warn!(
                subscription_id = %failure.subscription_id,
                error = %failure.error,
                "Billing run failure"
            );
        }
        Ok(summary)
    }
}
