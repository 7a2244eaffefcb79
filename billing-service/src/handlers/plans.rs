//! Plan handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreatePlanRequest, ListPlansQuery, UpdatePlanRequest},
    models::{CreatePlan, Plan, UpdatePlan},
    AppState,
};

pub async fn create_plan(
    State(state): State<AppState>,
    Json(payload): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Plan>), AppError> {
    payload.validate()?;

    if payload.monthly_fee < rust_decimal::Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Monthly fee cannot be negative"
        )));
    }

    let input = CreatePlan {
        name: payload.name,
        monthly_fee: payload.monthly_fee,
        router_profile: payload.router_profile,
    };

    let plan = state.db.create_plan(&input).await?;

    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Plan>, AppError> {
    let plan = state
        .db
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

    Ok(Json(plan))
}

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> Result<Json<Vec<Plan>>, AppError> {
    let plans = state
        .db
        .list_plans(query.include_inactive.unwrap_or(false))
        .await?;

    Ok(Json(plans))
}

pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(payload): Json<UpdatePlanRequest>,
) -> Result<Json<Plan>, AppError> {
    payload.validate()?;

    let input = UpdatePlan {
        name: payload.name,
        monthly_fee: payload.monthly_fee,
        router_profile: payload.router_profile,
    };

    let plan = state
        .db
        .update_plan(plan_id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found or inactive")))?;

    Ok(Json(plan))
}

pub async fn deactivate_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Plan>, AppError> {
    let plan = state
        .db
        .deactivate_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found or already inactive")))?;

    Ok(Json(plan))
}
