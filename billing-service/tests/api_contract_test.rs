//! Wire-contract tests for the HTTP request and response shapes.

use billing_service::billing::{preview_plan_change, AnchorDay};
use billing_service::dtos::{ProrationResponse, RecordPaymentRequest};
use billing_service::models::PaymentMethod;
use chrono::NaiveDate;
use rust_decimal::Decimal;

fn money(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[test]
fn record_payment_request_parses_snake_case_methods() {
    let body = r#"{
        "subscription_id": "5f7a4c88-8e05-4cf8-9a2e-0a3d2ad1b001",
        "invoice_id": null,
        "amount": "499.00",
        "method": "e_wallet",
        "gateway_reference": "ch_123"
    }"#;

    let request: RecordPaymentRequest = serde_json::from_str(body).unwrap();
    assert_eq!(request.method, PaymentMethod::EWallet);
    assert_eq!(request.amount, money("499.00"));
    assert!(request.paid_date.is_none());
    assert_eq!(request.gateway_reference.as_deref(), Some("ch_123"));
}

#[test]
fn record_payment_request_rejects_unknown_methods() {
    let body = r#"{
        "subscription_id": "5f7a4c88-8e05-4cf8-9a2e-0a3d2ad1b001",
        "amount": "499.00",
        "method": "cheque"
    }"#;

    assert!(serde_json::from_str::<RecordPaymentRequest>(body).is_err());
}

#[test]
fn proration_response_exposes_the_period_bounds() {
    let change_date = NaiveDate::from_ymd_opt(2026, 7, 10).unwrap();
    let proration =
        preview_plan_change(money("1000"), money("1500"), AnchorDay::Fifteenth, change_date)
            .unwrap();

    let response: ProrationResponse = proration.into();
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["period_start"], "2026-06-15");
    assert_eq!(json["period_end"], "2026-07-15");
    assert_eq!(json["days_remaining"], 5);
    assert_eq!(json["net"], "83.33");
}
