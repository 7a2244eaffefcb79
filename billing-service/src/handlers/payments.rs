//! Payment handlers: recording, verification, gateway webhook.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{ListPaymentsQuery, PaymentResponse, RecordPaymentRequest, VerificationResponse},
    models::{ListPaymentsFilter, Payment, RecordPayment},
    AppState,
};

const GATEWAY_SIGNATURE_HEADER: &str = "x-gateway-signature";

pub async fn record_payment(
    State(state): State<AppState>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    let input = RecordPayment {
        subscription_id: payload.subscription_id,
        invoice_id: payload.invoice_id,
        amount: payload.amount,
        paid_date: payload.paid_date.unwrap_or_else(|| Utc::now().date_naive()),
        method: payload.method,
        gateway_reference: payload.gateway_reference,
        notes: payload.notes,
    };

    tracing::info!(
        subscription_id = %input.subscription_id,
        amount = %input.amount,
        method = input.method.as_str(),
        "Recording payment"
    );

    let outcome = state.ops.record_payment(&input).await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(payment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let filter = ListPaymentsFilter {
        subscription_id: query.subscription_id,
        invoice_id: query.invoice_id,
        verification: query.verification,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let payments = state.db.list_payments(&filter).await?;

    Ok(Json(payments))
}

pub async fn approve_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<VerificationResponse>, AppError> {
    tracing::info!(payment_id = %payment_id, "Approving payment");

    let outcome = state.ops.approve_payment(payment_id).await?;

    Ok(Json(outcome.into()))
}

pub async fn reject_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<VerificationResponse>, AppError> {
    tracing::info!(payment_id = %payment_id, "Rejecting payment");

    let outcome = state.ops.reject_payment(payment_id).await?;

    Ok(Json(outcome.into()))
}

/// Gateway webhook receiver.
///
/// Verifies the HMAC signature over the raw body before trusting the
/// payload. A settled charge approves the matching pending payment.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(GATEWAY_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing gateway signature")))?;

    let valid = state
        .gateway
        .verify_webhook_signature(&body, signature)
        .map_err(AppError::InternalError)?;

    if !valid {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid gateway signature"
        )));
    }

    let event = state
        .gateway
        .parse_webhook_event(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed webhook payload: {}", e)))?;

    tracing::info!(
        event = %event.event,
        charge_id = %event.charge.id,
        "Gateway webhook received"
    );

    match event.event.as_str() {
        "charge.paid" => {
            let outcome = state.ops.settle_gateway_charge(&event.charge.id).await?;
            Ok(Json(json!({
                "handled": true,
                "payment_id": outcome.payment.payment_id,
                "applied": outcome.applied,
            })))
        }
        "charge.failed" => {
            let payment = state
                .db
                .find_payment_by_reference(&event.charge.id)
                .await?;
            match payment {
                Some(payment) => {
                    let outcome = state.ops.reject_payment(payment.payment_id).await?;
                    Ok(Json(json!({
                        "handled": true,
                        "payment_id": outcome.payment.payment_id,
                        "applied": outcome.applied,
                    })))
                }
                None => Ok(Json(json!({ "handled": false }))),
            }
        }
        _ => Ok(Json(json!({ "handled": false }))),
    }
}
