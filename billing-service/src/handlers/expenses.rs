//! Expense handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{CreateExpenseRequest, ExpenseListResponse, ListExpensesQuery},
    models::{CreateExpense, Expense, ListExpensesFilter},
    AppState,
};

pub async fn create_expense(
    State(state): State<AppState>,
    Json(payload): Json<CreateExpenseRequest>,
) -> Result<(StatusCode, Json<Expense>), AppError> {
    payload.validate()?;

    if payload.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Expense amount must be positive"
        )));
    }

    let input = CreateExpense {
        unit_id: payload.unit_id,
        category: payload.category,
        description: payload.description,
        amount: payload.amount,
        expense_date: payload.expense_date,
    };

    let expense = state.db.create_expense(&input).await?;

    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn list_expenses(
    State(state): State<AppState>,
    Query(query): Query<ListExpensesQuery>,
) -> Result<Json<ExpenseListResponse>, AppError> {
    let filter = ListExpensesFilter {
        unit_id: query.unit_id,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let expenses = state.db.list_expenses(&filter).await?;
    let total = expenses.iter().map(|e| e.amount).sum();

    Ok(Json(ExpenseListResponse { expenses, total }))
}
