//! Database service for billing-service.
//!
//! Row-level CRUD plus the transactional composites behind plan changes,
//! payment reconciliation and the billing run. Subscription balance is only
//! ever written here, by those composites.

use crate::billing::{
    current_period, derive_status, payment_ledger_entry, preview_plan_change, prorate, reconcile,
    ProrationResult,
};
use crate::models::{
    AdjustmentReason, BalanceAdjustment, BusinessUnit, CreateCustomer, CreateExpense, CreatePlan,
    CreateSubscription, Customer, Expense, Invoice, InvoiceStatus, ListCustomersFilter,
    ListExpensesFilter, ListInvoicesFilter, ListPaymentsFilter, ListSubscriptionsFilter, Payment,
    PaymentMethod, Plan, RecordPayment, Subscription, UpdatePlan, VerificationStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, customer_id, plan_id, unit_id, pppoe_name, is_active, billing_anchor_day, balance, installation_date, current_period_start, current_period_end, created_utc, updated_utc";
const INVOICE_COLUMNS: &str = "invoice_id, subscription_id, period_start, period_end, due_date, amount_due, status, description, created_utc";
const PAYMENT_COLUMNS: &str = "payment_id, subscription_id, invoice_id, amount, paid_date, method, verification, gateway_reference, notes, created_utc";
const PLAN_COLUMNS: &str =
    "plan_id, name, monthly_fee, router_profile, is_active, created_utc, updated_utc";

/// Outcome of a committed prorated plan change.
#[derive(Debug, Clone)]
pub struct PlanChangeRecord {
    pub subscription: Subscription,
    pub proration: ProrationResult,
    /// Present when the net proration was a charge.
    pub invoice: Option<Invoice>,
    /// Present when the net proration was a credit.
    pub adjustment: Option<BalanceAdjustment>,
}

/// Outcome of recording a payment.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
    /// Overpayment credit created by this payment (zero or negative).
    pub spillover: Decimal,
}

/// Outcome of approving or rejecting a pending payment.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
    /// False when the payment was already in a terminal state and the call
    /// was a no-op.
    pub applied: bool,
}

/// A per-subscription failure during a billing run.
#[derive(Debug, Clone)]
pub struct BillingRunFailure {
    pub subscription_id: Uuid,
    pub error: String,
}

/// Summary of one billing run.
#[derive(Debug, Clone, Default)]
pub struct BillingRunSummary {
    pub invoices: Vec<Invoice>,
    pub failures: Vec<BillingRunFailure>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Customer Operations
    // =========================================================================

    /// Create a new customer.
    #[instrument(skip(self, input))]
    pub async fn create_customer(&self, input: &CreateCustomer) -> Result<Customer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (customer_id, full_name, phone, address)
            VALUES ($1, $2, $3, $4)
            RETURNING customer_id, full_name, phone, address, is_active, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.full_name)
        .bind(&input.phone)
        .bind(&input.address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create customer: {}", e)))?;

        timer.observe_duration();
        info!(customer_id = %customer.customer_id, "Customer created");

        Ok(customer)
    }

    /// Get a customer by ID.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            "SELECT customer_id, full_name, phone, address, is_active, created_utc FROM customers WHERE customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    /// List customers.
    #[instrument(skip(self, filter))]
    pub async fn list_customers(
        &self,
        filter: &ListCustomersFilter,
    ) -> Result<Vec<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_customers"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let cursor = filter.page_token.unwrap_or(Uuid::nil());

        let customers = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, full_name, phone, address, is_active, created_utc
            FROM customers
            WHERE ($1::bool = FALSE OR is_active = TRUE)
              AND customer_id > $2
            ORDER BY customer_id
            LIMIT $3
            "#,
        )
        .bind(filter.active_only)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list customers: {}", e)))?;

        timer.observe_duration();

        Ok(customers)
    }

    // =========================================================================
    // Business Unit Operations
    // =========================================================================

    /// Create a business unit.
    #[instrument(skip(self))]
    pub async fn create_business_unit(&self, name: &str) -> Result<BusinessUnit, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_business_unit"])
            .start_timer();

        let unit = sqlx::query_as::<_, BusinessUnit>(
            r#"
            INSERT INTO business_units (unit_id, name)
            VALUES ($1, $2)
            RETURNING unit_id, name, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create business unit: {}", e))
        })?;

        timer.observe_duration();

        Ok(unit)
    }

    /// List business units.
    #[instrument(skip(self))]
    pub async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_business_units"])
            .start_timer();

        let units = sqlx::query_as::<_, BusinessUnit>(
            "SELECT unit_id, name, created_utc FROM business_units ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list business units: {}", e))
        })?;

        timer.observe_duration();

        Ok(units)
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Create a new plan.
    #[instrument(skip(self, input))]
    pub async fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            INSERT INTO plans (plan_id, name, monthly_fee, router_profile)
            VALUES ($1, $2, $3, $4)
            RETURNING {PLAN_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(input.monthly_fee)
        .bind(&input.router_profile)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)))?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, name = %plan.name, "Plan created");

        Ok(plan)
    }

    /// Get a plan by ID.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE plan_id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// List active plans.
    #[instrument(skip(self))]
    pub async fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, Plan>(&format!(
            r#"
            SELECT {PLAN_COLUMNS}
            FROM plans
            WHERE ($1::bool = TRUE OR is_active = TRUE)
            ORDER BY name
            "#,
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    /// Update a plan.
    #[instrument(skip(self, input), fields(plan_id = %plan_id))]
    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            UPDATE plans
            SET name = COALESCE($2, name),
                monthly_fee = COALESCE($3, monthly_fee),
                router_profile = COALESCE($4, router_profile),
                updated_utc = NOW()
            WHERE plan_id = $1 AND is_active = TRUE
            RETURNING {PLAN_COLUMNS}
            "#,
        ))
        .bind(plan_id)
        .bind(&input.name)
        .bind(input.monthly_fee)
        .bind(&input.router_profile)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// Deactivate a plan so new subscriptions cannot use it.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn deactivate_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deactivate_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            UPDATE plans
            SET is_active = FALSE, updated_utc = NOW()
            WHERE plan_id = $1 AND is_active = TRUE
            RETURNING {PLAN_COLUMNS}
            "#,
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to deactivate plan: {}", e)))?;

        timer.observe_duration();

        if let Some(ref p) = plan {
            info!(plan_id = %p.plan_id, "Plan deactivated");
        }

        Ok(plan)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Create a subscription together with its prorated activation invoice.
    ///
    /// The activation invoice covers the window from the installation date
    /// to the first anchor boundary. The row starts at balance zero and the
    /// invoice raises it, so the balance always equals the sum of invoices
    /// minus credits.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_subscription_with_activation(
        &self,
        input: &CreateSubscription,
    ) -> Result<(Subscription, Option<Invoice>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let anchor = crate::billing::AnchorDay::from_day(input.billing_anchor_day).ok_or_else(
            || {
                AppError::BadRequest(anyhow::anyhow!(
                    "Billing anchor day must be 15 or 30, got {}",
                    input.billing_anchor_day
                ))
            },
        )?;

        let plan = self
            .get_plan(input.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        if !plan.is_active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot subscribe to an inactive plan"
            )));
        }

        let period = current_period(anchor, input.installation_date);
        let activation =
            prorate(Decimal::ZERO, plan.monthly_fee, &period, input.installation_date)?;

        let mut tx = self.begin().await?;

        let mut subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, customer_id, plan_id, unit_id, pppoe_name, billing_anchor_day, balance, installation_date, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(input.customer_id)
        .bind(input.plan_id)
        .bind(input.unit_id)
        .bind(&input.pppoe_name)
        .bind(input.billing_anchor_day)
        .bind(Decimal::ZERO)
        .bind(input.installation_date)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        let invoice = if activation.charge > Decimal::ZERO {
            let invoice = Self::insert_invoice(
                &mut tx,
                subscription.subscription_id,
                input.installation_date,
                period.end,
                period.end,
                activation.charge,
                Some(format!(
                    "Activation: {} from {} to {}",
                    plan.name, input.installation_date, period.end
                )),
            )
            .await?;
            // The RETURNING above ran before the invoice raised the balance.
            subscription.balance += invoice.amount_due;
            Some(invoice)
        } else {
            None
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit subscription: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Subscription created");

        Ok((subscription, invoice))
    }

    /// Get a subscription by ID.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// List subscriptions.
    #[instrument(skip(self, filter))]
    pub async fn list_subscriptions(
        &self,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let cursor = filter.page_token.unwrap_or(Uuid::nil());

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE ($1::uuid IS NULL OR customer_id = $1)
              AND ($2::uuid IS NULL OR unit_id = $2)
              AND ($3::bool = FALSE OR is_active = TRUE)
              AND subscription_id > $4
            ORDER BY subscription_id
            LIMIT $5
            "#,
        ))
        .bind(filter.customer_id)
        .bind(filter.unit_id)
        .bind(filter.active_only)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    /// Deactivate a subscription (soft lifecycle; rows are never deleted).
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn deactivate_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deactivate_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET is_active = FALSE, updated_utc = NOW()
            WHERE subscription_id = $1 AND is_active = TRUE
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to deactivate subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    // =========================================================================
    // Plan Change
    // =========================================================================

    /// Apply a prorated plan change inside one transaction.
    ///
    /// A positive net proration becomes an adjustment invoice and raises
    /// the balance; a negative net becomes a signed balance-adjustment
    /// ledger entry and credits the balance. Router sync happens outside,
    /// after commit.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn change_plan_prorated(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
        change_date: NaiveDate,
    ) -> Result<PlanChangeRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["change_plan_prorated"])
            .start_timer();

        let mut tx = self.begin().await?;

        let subscription = Self::lock_subscription(&mut tx, subscription_id).await?;

        if !subscription.is_active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription must be active to change plan"
            )));
        }

        let old_plan = Self::fetch_plan(&mut tx, subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Current plan not found")))?;
        let new_plan = Self::fetch_plan(&mut tx, new_plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("New plan not found")))?;

        if !new_plan.is_active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot change to an inactive plan"
            )));
        }

        let proration = preview_plan_change(
            old_plan.monthly_fee,
            new_plan.monthly_fee,
            subscription.anchor(),
            change_date,
        )?;

        let mut invoice = None;
        let mut adjustment = None;

        if proration.net > Decimal::ZERO {
            let created = Self::insert_invoice(
                &mut tx,
                subscription_id,
                change_date,
                proration.period.end,
                proration.period.end,
                proration.net,
                Some(format!(
                    "Plan change {} -> {}: {}",
                    old_plan.name, new_plan.name, proration.description
                )),
            )
            .await?;
            invoice = Some(created);
        } else if proration.net < Decimal::ZERO {
            let created = Self::insert_adjustment(
                &mut tx,
                subscription_id,
                proration.net,
                AdjustmentReason::PlanChangeCredit,
                Some(format!(
                    "Plan change {} -> {}: {}",
                    old_plan.name, new_plan.name, proration.description
                )),
            )
            .await?;
            Self::apply_balance_delta(&mut tx, subscription_id, proration.net).await?;
            adjustment = Some(created);
        }

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET plan_id = $2, updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(new_plan_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription plan: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit plan change: {}", e))
        })?;

        timer.observe_duration();
        info!(
            subscription_id = %subscription_id,
            net = %proration.net,
            "Plan change committed"
        );

        Ok(PlanChangeRecord {
            subscription,
            proration,
            invoice,
            adjustment,
        })
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let cursor = filter.page_token.unwrap_or(Uuid::nil());

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::uuid IS NULL OR subscription_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND invoice_id > $3
            ORDER BY invoice_id
            LIMIT $4
            "#,
        ))
        .bind(filter.subscription_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// List invoices across all of a customer's subscriptions (portal view).
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_invoices_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices_for_customer"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT i.invoice_id, i.subscription_id, i.period_start, i.period_end, i.due_date, i.amount_due, i.status, i.description, i.created_utc
            FROM invoices i
            JOIN subscriptions s ON s.subscription_id = i.subscription_id
            WHERE s.customer_id = $1
            ORDER BY i.created_utc DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list customer invoices: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Sum of approved payments already settled against an invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn approved_total_for_invoice(&self, invoice_id: Uuid) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approved_total_for_invoice"])
            .start_timer();

        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1 AND verification = 'approved'",
        )
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum approved payments: {}", e))
        })?;

        timer.observe_duration();

        Ok(total)
    }

    /// List payments across all of a customer's subscriptions (portal view).
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_payments_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments_for_customer"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT p.payment_id, p.subscription_id, p.invoice_id, p.amount, p.paid_date, p.method, p.verification, p.gateway_reference, p.notes, p.created_utc
            FROM payments p
            JOIN subscriptions s ON s.subscription_id = p.subscription_id
            WHERE s.customer_id = $1
            ORDER BY p.created_utc DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list customer payments: {}", e))
        })?;

        timer.observe_duration();

        Ok(payments)
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Record a payment.
    ///
    /// Cash and bank payments are created approved and applied immediately.
    /// E-wallet payments are created pending and leave balance and invoice
    /// settlement untouched until an explicit approval.
    #[instrument(skip(self, input), fields(subscription_id = %input.subscription_id))]
    pub async fn record_payment(&self, input: &RecordPayment) -> Result<PaymentOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive"
            )));
        }

        let mut tx = self.begin().await?;

        let _subscription = Self::lock_subscription(&mut tx, input.subscription_id).await?;

        if let Some(invoice_id) = input.invoice_id {
            let invoice = Self::fetch_invoice(&mut tx, invoice_id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
            if invoice.subscription_id != input.subscription_id {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Invoice does not belong to the subscription"
                )));
            }
        }

        let verification = match input.method {
            PaymentMethod::EWallet => VerificationStatus::Pending,
            _ => VerificationStatus::Approved,
        };

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, subscription_id, invoice_id, amount, paid_date, method, verification, gateway_reference, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(input.subscription_id)
        .bind(input.invoice_id)
        .bind(input.amount)
        .bind(input.paid_date)
        .bind(input.method.as_str())
        .bind(verification.as_str())
        .bind(&input.gateway_reference)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;

        let (invoice, spillover) = match verification {
            VerificationStatus::Approved => {
                Self::apply_approved_payment(&mut tx, &payment).await?
            }
            _ => {
                let invoice = Self::mark_invoice_pending(&mut tx, payment.invoice_id).await?;
                (invoice, Decimal::ZERO)
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit payment: {}", e))
        })?;

        timer.observe_duration();
        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            verification = %payment.verification,
            "Payment recorded"
        );

        Ok(PaymentOutcome {
            payment,
            invoice,
            spillover,
        })
    }

    /// Approve a pending payment.
    ///
    /// The transition is a conditional update keyed on the pending state:
    /// a concurrent duplicate approval matches zero rows and returns a
    /// no-op outcome, so a payment is applied at most once.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn approve_payment(&self, payment_id: Uuid) -> Result<VerificationOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let existing = Self::fetch_payment(&mut tx, payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        let _subscription = Self::lock_subscription(&mut tx, existing.subscription_id).await?;

        let approved = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET verification = 'approved'
            WHERE payment_id = $1 AND verification = 'pending'
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to approve payment: {}", e)))?;

        let outcome = match approved {
            Some(payment) => {
                let (invoice, _spillover) =
                    Self::apply_approved_payment(&mut tx, &payment).await?;
                VerificationOutcome {
                    payment,
                    invoice,
                    applied: true,
                }
            }
            None => {
                // Already terminal; nothing to apply.
                let invoice = match existing.invoice_id {
                    Some(id) => Self::fetch_invoice(&mut tx, id).await?,
                    None => None,
                };
                VerificationOutcome {
                    payment: existing,
                    invoice,
                    applied: false,
                }
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit approval: {}", e))
        })?;

        timer.observe_duration();

        Ok(outcome)
    }

    /// Reject a pending payment.
    ///
    /// The payment contributes nothing to balance regardless of its claimed
    /// amount; the invoice status is re-derived from approved payments only
    /// (reverting to unpaid when there are none).
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn reject_payment(&self, payment_id: Uuid) -> Result<VerificationOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reject_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let existing = Self::fetch_payment(&mut tx, payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        let _subscription = Self::lock_subscription(&mut tx, existing.subscription_id).await?;

        let rejected = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET verification = 'rejected'
            WHERE payment_id = $1 AND verification = 'pending'
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reject payment: {}", e)))?;

        let outcome = match rejected {
            Some(payment) => {
                let invoice = match payment.invoice_id {
                    Some(invoice_id) => {
                        Some(Self::rederive_invoice_status(&mut tx, invoice_id).await?)
                    }
                    None => None,
                };
                VerificationOutcome {
                    payment,
                    invoice,
                    applied: true,
                }
            }
            None => {
                let invoice = match existing.invoice_id {
                    Some(id) => Self::fetch_invoice(&mut tx, id).await?,
                    None => None,
                };
                VerificationOutcome {
                    payment: existing,
                    invoice,
                    applied: false,
                }
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit rejection: {}", e))
        })?;

        timer.observe_duration();

        Ok(outcome)
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Find a payment by its gateway charge reference.
    #[instrument(skip(self))]
    pub async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_by_reference"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_reference = $1"
        ))
        .bind(gateway_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find payment by reference: {}", e))
        })?;

        timer.observe_duration();

        Ok(payment)
    }

    /// List payments.
    #[instrument(skip(self, filter))]
    pub async fn list_payments(
        &self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let cursor = filter.page_token.unwrap_or(Uuid::nil());

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE ($1::uuid IS NULL OR subscription_id = $1)
              AND ($2::uuid IS NULL OR invoice_id = $2)
              AND ($3::text IS NULL OR verification = $3)
              AND payment_id > $4
            ORDER BY payment_id
            LIMIT $5
            "#,
        ))
        .bind(filter.subscription_id)
        .bind(filter.invoice_id)
        .bind(filter.verification.map(|v| v.as_str()))
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    // =========================================================================
    // Billing Run
    // =========================================================================

    /// Generate the next full-month invoice for every active subscription
    /// whose current period has ended.
    ///
    /// Each subscription is processed in its own transaction; failures are
    /// collected in the summary rather than aborting the run.
    #[instrument(skip(self))]
    pub async fn run_billing_cycle(&self, today: NaiveDate) -> Result<BillingRunSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["run_billing_cycle"])
            .start_timer();

        let due = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE is_active = TRUE AND current_period_end <= $1
            ORDER BY subscription_id
            "#,
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to find subscriptions due for billing: {}",
                e
            ))
        })?;

        let mut summary = BillingRunSummary::default();

        for subscription in due {
            match self.bill_subscription(&subscription).await {
                Ok(Some(invoice)) => summary.invoices.push(invoice),
                Ok(None) => {}
                Err(e) => summary.failures.push(BillingRunFailure {
                    subscription_id: subscription.subscription_id,
                    error: e.to_string(),
                }),
            }
        }

        timer.observe_duration();
        info!(
            generated = summary.invoices.len(),
            failed = summary.failures.len(),
            "Billing run completed"
        );

        Ok(summary)
    }

    /// Bill one subscription for its next period. Zero-fee plans advance
    /// the period without producing an invoice.
    async fn bill_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<Invoice>, AppError> {
        let plan = self
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        // The old period end sits on an anchor boundary, so the containing
        // period of that date is exactly the next full month.
        let next = current_period(subscription.anchor(), subscription.current_period_end);

        let mut tx = self.begin().await?;

        let locked = Self::lock_subscription(&mut tx, subscription.subscription_id).await?;
        if locked.current_period_end != subscription.current_period_end {
            // Another run already advanced this subscription.
            tx.rollback().await.ok();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription already billed for this period"
            )));
        }

        let invoice = if plan.monthly_fee > Decimal::ZERO {
            Some(
                Self::insert_invoice(
                    &mut tx,
                    subscription.subscription_id,
                    next.start,
                    next.end,
                    next.end,
                    plan.monthly_fee,
                    Some(format!("{} from {} to {}", plan.name, next.start, next.end)),
                )
                .await?,
            )
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET current_period_start = $2, current_period_end = $3, updated_utc = NOW()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(next.start)
        .bind(next.end)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance billing period: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit billing run: {}", e))
        })?;

        Ok(invoice)
    }

    // =========================================================================
    // Adjustment Operations
    // =========================================================================

    /// Record a manual balance adjustment.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn create_manual_adjustment(
        &self,
        subscription_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<BalanceAdjustment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_manual_adjustment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let _subscription = Self::lock_subscription(&mut tx, subscription_id).await?;
        let adjustment = Self::insert_adjustment(
            &mut tx,
            subscription_id,
            amount,
            AdjustmentReason::Manual,
            description,
        )
        .await?;
        Self::apply_balance_delta(&mut tx, subscription_id, amount).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit adjustment: {}", e))
        })?;

        timer.observe_duration();

        Ok(adjustment)
    }

    /// List adjustments for a subscription.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn list_adjustments(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<BalanceAdjustment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_adjustments"])
            .start_timer();

        let adjustments = sqlx::query_as::<_, BalanceAdjustment>(
            r#"
            SELECT adjustment_id, subscription_id, amount, reason, description, created_utc
            FROM balance_adjustments
            WHERE subscription_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list adjustments: {}", e))
        })?;

        timer.observe_duration();

        Ok(adjustments)
    }

    // =========================================================================
    // Expense Operations
    // =========================================================================

    /// Create an expense.
    #[instrument(skip(self, input), fields(unit_id = %input.unit_id))]
    pub async fn create_expense(&self, input: &CreateExpense) -> Result<Expense, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_expense"])
            .start_timer();

        let expense = sqlx::query_as::<_, Expense>(
            r#"
            INSERT INTO expenses (expense_id, unit_id, category, description, amount, expense_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING expense_id, unit_id, category, description, amount, expense_date, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.unit_id)
        .bind(&input.category)
        .bind(&input.description)
        .bind(input.amount)
        .bind(input.expense_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create expense: {}", e)))?;

        timer.observe_duration();

        Ok(expense)
    }

    /// List expenses.
    #[instrument(skip(self, filter))]
    pub async fn list_expenses(
        &self,
        filter: &ListExpensesFilter,
    ) -> Result<Vec<Expense>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_expenses"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let cursor = filter.page_token.unwrap_or(Uuid::nil());

        let expenses = sqlx::query_as::<_, Expense>(
            r#"
            SELECT expense_id, unit_id, category, description, amount, expense_date, created_utc
            FROM expenses
            WHERE ($1::uuid IS NULL OR unit_id = $1)
              AND ($2::date IS NULL OR expense_date >= $2)
              AND ($3::date IS NULL OR expense_date <= $3)
              AND expense_id > $4
            ORDER BY expense_id
            LIMIT $5
            "#,
        )
        .bind(filter.unit_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list expenses: {}", e)))?;

        timer.observe_duration();

        Ok(expenses)
    }

    // =========================================================================
    // Transaction helpers
    // =========================================================================

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn lock_subscription(
        tx: &mut Transaction<'static, Postgres>,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = $1 FOR UPDATE"
        ))
        .bind(subscription_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock subscription: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))
    }

    async fn fetch_plan(
        tx: &mut Transaction<'static, Postgres>,
        plan_id: Uuid,
    ) -> Result<Option<Plan>, AppError> {
        sqlx::query_as::<_, Plan>(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE plan_id = $1"))
            .bind(plan_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch plan: {}", e)))
    }

    async fn fetch_invoice(
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e)))
    }

    async fn fetch_payment(
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch payment: {}", e)))
    }

    /// Insert an invoice and raise the subscription balance by its amount.
    async fn insert_invoice(
        tx: &mut Transaction<'static, Postgres>,
        subscription_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
        due_date: NaiveDate,
        amount_due: Decimal,
        description: Option<String>,
    ) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, subscription_id, period_start, period_end, due_date, amount_due, status, description)
            VALUES ($1, $2, $3, $4, $5, $6, 'unpaid', $7)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(subscription_id)
        .bind(period_start)
        .bind(period_end)
        .bind(due_date)
        .bind(amount_due)
        .bind(description)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice: {}", e)))?;

        Self::apply_balance_delta(tx, subscription_id, amount_due).await?;

        Ok(invoice)
    }

    async fn insert_adjustment(
        tx: &mut Transaction<'static, Postgres>,
        subscription_id: Uuid,
        amount: Decimal,
        reason: AdjustmentReason,
        description: Option<String>,
    ) -> Result<BalanceAdjustment, AppError> {
        sqlx::query_as::<_, BalanceAdjustment>(
            r#"
            INSERT INTO balance_adjustments (adjustment_id, subscription_id, amount, reason, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING adjustment_id, subscription_id, amount, reason, description, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subscription_id)
        .bind(amount)
        .bind(reason.as_str())
        .bind(description)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert adjustment: {}", e))
        })
    }

    async fn apply_balance_delta(
        tx: &mut Transaction<'static, Postgres>,
        subscription_id: Uuid,
        delta: Decimal,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE subscriptions SET balance = balance + $2, updated_utc = NOW() WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(delta)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update balance: {}", e)))?;
        Ok(())
    }

    /// Sum of approved payments against an invoice, excluding one payment.
    async fn approved_total_excluding(
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
        exclude: Uuid,
    ) -> Result<Decimal, AppError> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM payments
            WHERE invoice_id = $1 AND verification = 'approved' AND payment_id <> $2
            "#,
        )
        .bind(invoice_id)
        .bind(exclude)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum approved payments: {}", e))
        })
    }

    /// Apply an approved payment: settle the invoice (when linked), move
    /// the subscription balance by the full amount, and record spillover
    /// credit as a ledger entry.
    async fn apply_approved_payment(
        tx: &mut Transaction<'static, Postgres>,
        payment: &Payment,
    ) -> Result<(Option<Invoice>, Decimal), AppError> {
        match payment.invoice_id {
            Some(invoice_id) => {
                let invoice = Self::fetch_invoice(tx, invoice_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

                let approved_before =
                    Self::approved_total_excluding(tx, invoice_id, payment.payment_id).await?;
                let reconciliation =
                    reconcile(invoice.amount_due, approved_before, payment.amount);

                let invoice = sqlx::query_as::<_, Invoice>(&format!(
                    r#"
                    UPDATE invoices
                    SET status = $2
                    WHERE invoice_id = $1
                    RETURNING {INVOICE_COLUMNS}
                    "#,
                ))
                .bind(invoice_id)
                .bind(reconciliation.new_status.as_str())
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to update invoice status: {}",
                        e
                    ))
                })?;

                let entry = payment_ledger_entry(payment.amount, &reconciliation);

                Self::apply_balance_delta(tx, payment.subscription_id, entry.invoice_settlement)
                    .await?;

                if entry.spillover_credit < Decimal::ZERO {
                    Self::insert_adjustment(
                        tx,
                        payment.subscription_id,
                        entry.spillover_credit,
                        AdjustmentReason::OverpaymentCredit,
                        Some(format!("Overpayment on invoice {}", invoice_id)),
                    )
                    .await?;
                    Self::apply_balance_delta(tx, payment.subscription_id, entry.spillover_credit)
                        .await?;
                }

                Ok((Some(invoice), entry.spillover_credit))
            }
            None => {
                // Advance payment: the whole amount is credit.
                Self::apply_balance_delta(tx, payment.subscription_id, -payment.amount).await?;
                Ok((None, Decimal::ZERO))
            }
        }
    }

    /// Mark an invoice pending-verification while an e-wallet payment
    /// awaits review. Settled invoices are left alone.
    async fn mark_invoice_pending(
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Option<Uuid>,
    ) -> Result<Option<Invoice>, AppError> {
        let Some(invoice_id) = invoice_id else {
            return Ok(None);
        };

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'pending_verification'
            WHERE invoice_id = $1 AND status <> 'paid'
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice pending: {}", e))
        })?;

        match invoice {
            Some(invoice) => Ok(Some(invoice)),
            None => Self::fetch_invoice(tx, invoice_id).await,
        }
    }

    /// Re-derive an invoice's status from its approved payments.
    async fn rederive_invoice_status(
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let invoice = Self::fetch_invoice(tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let approved_total =
            Self::approved_total_excluding(tx, invoice_id, Uuid::nil()).await?;
        let status = derive_status(invoice.amount_due, approved_total);

        let has_pending: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE invoice_id = $1 AND verification = 'pending')",
        )
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check pending payments: {}", e))
        })?;

        let status = if has_pending && status != InvoiceStatus::Paid {
            InvoiceStatus::PendingVerification
        } else {
            status
        };

        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $2
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice status: {}", e))
        })
    }
}
