//! Subscription handlers: activation, plan change, billing run.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        ActivationResponse, BillingRunRequest, BillingRunResponse, CreateSubscriptionRequest,
        ListSubscriptionsQuery, ManualAdjustmentRequest, PlanChangeRequest, PlanChangeResponse,
        ProrationResponse, SuspensionResponse,
    },
    models::{BalanceAdjustment, CreateSubscription, ListSubscriptionsFilter, Subscription},
    AppState,
};

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<ActivationResponse>), AppError> {
    payload.validate()?;

    let input = CreateSubscription {
        customer_id: payload.customer_id,
        plan_id: payload.plan_id,
        unit_id: payload.unit_id,
        pppoe_name: payload.pppoe_name,
        pppoe_password: payload.pppoe_password,
        billing_anchor_day: payload.billing_anchor_day,
        installation_date: payload.installation_date,
    };

    tracing::info!(
        customer_id = %input.customer_id,
        plan_id = %input.plan_id,
        installation_date = %input.installation_date,
        "Activating subscription"
    );

    let result = state.ops.activate_subscription(&input).await?;

    Ok((StatusCode::CREATED, Json(result.into())))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .db
        .get_subscription(subscription_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

    Ok(Json(subscription))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    let filter = ListSubscriptionsFilter {
        customer_id: query.customer_id,
        unit_id: query.unit_id,
        active_only: query.active_only.unwrap_or(false),
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let subscriptions = state.db.list_subscriptions(&filter).await?;

    Ok(Json(subscriptions))
}

pub async fn suspend_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<SuspensionResponse>, AppError> {
    let result = state.ops.suspend_subscription(subscription_id).await?;
    Ok(Json(result.into()))
}

/// Preview a plan change without committing anything.
pub async fn preview_plan_change(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<PlanChangeRequest>,
) -> Result<Json<ProrationResponse>, AppError> {
    let change_date = payload
        .change_date
        .unwrap_or_else(|| Utc::now().date_naive());

    let proration = state
        .ops
        .preview_plan_change(subscription_id, payload.new_plan_id, change_date)
        .await?;

    Ok(Json(proration.into()))
}

/// Commit a prorated plan change.
pub async fn change_plan(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<PlanChangeRequest>,
) -> Result<Json<PlanChangeResponse>, AppError> {
    let change_date = payload
        .change_date
        .unwrap_or_else(|| Utc::now().date_naive());

    tracing::info!(
        subscription_id = %subscription_id,
        new_plan_id = %payload.new_plan_id,
        change_date = %change_date,
        "Processing plan change"
    );

    let result = state
        .ops
        .process_plan_change(subscription_id, payload.new_plan_id, change_date)
        .await?;

    Ok(Json(result.into()))
}

pub async fn create_manual_adjustment(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<ManualAdjustmentRequest>,
) -> Result<(StatusCode, Json<BalanceAdjustment>), AppError> {
    let adjustment = state
        .db
        .create_manual_adjustment(subscription_id, payload.amount, payload.description)
        .await?;

    Ok((StatusCode::CREATED, Json(adjustment)))
}

pub async fn list_adjustments(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Vec<BalanceAdjustment>>, AppError> {
    let adjustments = state.db.list_adjustments(subscription_id).await?;
    Ok(Json(adjustments))
}

/// Generate invoices for every subscription whose period has ended.
pub async fn run_billing_cycle(
    State(state): State<AppState>,
    Json(payload): Json<BillingRunRequest>,
) -> Result<Json<BillingRunResponse>, AppError> {
    let as_of = payload.as_of.unwrap_or_else(|| Utc::now().date_naive());

    tracing::info!(as_of = %as_of, "Starting billing run");

    let summary = state.ops.run_billing_cycle(as_of).await?;

    Ok(Json(summary.into()))
}
