//! Customer portal handlers: read-only views scoped to one customer.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{PortalChargeRequest, PortalChargeResponse, PortalOverviewResponse},
    models::{
        Invoice, InvoiceStatus, ListSubscriptionsFilter, Payment, PaymentMethod, RecordPayment,
    },
    services::gateway::{CreateChargeRequest, DEFAULT_CURRENCY},
    AppState,
};

/// Everything a customer sees when they open the portal: their profile,
/// subscriptions with balances, and invoice history.
pub async fn portal_overview(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<PortalOverviewResponse>, AppError> {
    let customer = state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;

    let subscriptions = state
        .db
        .list_subscriptions(&ListSubscriptionsFilter {
            customer_id: Some(customer_id),
            page_size: 100,
            ..Default::default()
        })
        .await?;

    let invoices = state.db.list_invoices_for_customer(customer_id).await?;

    Ok(Json(PortalOverviewResponse {
        customer,
        subscriptions,
        invoices,
    }))
}

/// Invoice history for one customer across all their subscriptions.
pub async fn portal_invoices(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;

    let invoices = state.db.list_invoices_for_customer(customer_id).await?;

    Ok(Json(invoices))
}

/// Payment history for one customer across all their subscriptions.
pub async fn portal_payments(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;

    let payments = state.db.list_payments_for_customer(customer_id).await?;

    Ok(Json(payments))
}

/// Pay an invoice through the e-wallet gateway.
///
/// Creates a gateway charge for the outstanding amount and records it as a
/// pending payment; the webhook (or an admin approval) settles it.
pub async fn pay_invoice(
    State(state): State<AppState>,
    Path((customer_id, invoice_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<PortalChargeRequest>,
) -> Result<(StatusCode, Json<PortalChargeResponse>), AppError> {
    payload.validate()?;

    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let subscription = state
        .db
        .get_subscription(invoice.subscription_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

    if subscription.customer_id != customer_id {
        return Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")));
    }

    if InvoiceStatus::from_string(&invoice.status) == InvoiceStatus::Paid {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Invoice is already settled"
        )));
    }

    let approved = state.db.approved_total_for_invoice(invoice_id).await?;
    let outstanding = invoice.amount_due - approved;
    if outstanding <= rust_decimal::Decimal::ZERO {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Invoice has no outstanding amount"
        )));
    }

    let charge = state
        .gateway
        .create_charge(&CreateChargeRequest {
            amount: outstanding,
            currency: DEFAULT_CURRENCY.to_string(),
            reference: invoice_id.to_string(),
            source_id: payload.source_id,
        })
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;

    let outcome = state
        .ops
        .record_payment(&RecordPayment {
            subscription_id: invoice.subscription_id,
            invoice_id: Some(invoice_id),
            amount: charge.amount,
            paid_date: Utc::now().date_naive(),
            method: PaymentMethod::EWallet,
            gateway_reference: Some(charge.id.clone()),
            notes: None,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PortalChargeResponse {
            payment: outcome.payment,
            invoice: outcome.invoice,
            charge_id: charge.id,
            charge_status: charge.status,
        }),
    ))
}
