//! Customer handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateBusinessUnitRequest, CreateCustomerRequest, ListCustomersQuery},
    models::{BusinessUnit, CreateCustomer, Customer, ListCustomersFilter},
    AppState,
};

pub async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    payload.validate()?;

    let input = CreateCustomer {
        full_name: payload.full_name,
        phone: payload.phone,
        address: payload.address,
    };

    let customer = state.db.create_customer(&input).await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Customer>, AppError> {
    let customer = state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;

    Ok(Json(customer))
}

pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<ListCustomersQuery>,
) -> Result<Json<Vec<Customer>>, AppError> {
    let filter = ListCustomersFilter {
        active_only: query.active_only.unwrap_or(false),
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let customers = state.db.list_customers(&filter).await?;

    Ok(Json(customers))
}

pub async fn create_business_unit(
    State(state): State<AppState>,
    Json(payload): Json<CreateBusinessUnitRequest>,
) -> Result<(StatusCode, Json<BusinessUnit>), AppError> {
    payload.validate()?;

    let unit = state.db.create_business_unit(&payload.name).await?;

    Ok((StatusCode::CREATED, Json(unit)))
}

pub async fn list_business_units(
    State(state): State<AppState>,
) -> Result<Json<Vec<BusinessUnit>>, AppError> {
    let units = state.db.list_business_units().await?;
    Ok(Json(units))
}
