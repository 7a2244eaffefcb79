//! End-to-end tests of the billing engine: activation proration, plan
//! changes, and payment reconciliation composed the way the service
//! composes them.

use billing_service::billing::{
    current_period, payment_ledger_entry, preview_plan_change, prorate, reconcile, AnchorDay,
};
use billing_service::models::{InvoiceStatus, VerificationStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn money(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[test]
fn activation_charges_only_the_remaining_window() {
    // Installed Aug 20 on a 15th-anchored subscription: the first period
    // runs Aug 15 - Sep 15 (31 days) and 26 days remain.
    let install = d(2026, 8, 20);
    let period = current_period(AnchorDay::Fifteenth, install);
    assert_eq!(period.start, d(2026, 8, 15));
    assert_eq!(period.end, d(2026, 9, 15));

    let activation = prorate(Decimal::ZERO, money("1500"), &period, install).unwrap();
    assert_eq!(activation.credit, Decimal::ZERO);
    assert_eq!(activation.days_in_period, 31);
    assert_eq!(activation.days_remaining, 26);
    // 1500 * 26/31 = 1258.0645... rounds half-up to 1258.06
    assert_eq!(activation.charge, money("1258.06"));
}

#[test]
fn activation_on_the_anchor_day_charges_a_full_month() {
    let install = d(2026, 8, 15);
    let period = current_period(AnchorDay::Fifteenth, install);
    assert_eq!(period.start, install);

    let activation = prorate(Decimal::ZERO, money("1500"), &period, install).unwrap();
    assert_eq!(activation.charge, money("1500.00"));
}

#[test]
fn activation_balance_equals_the_activation_invoice() {
    // A subscription opens at balance zero; the activation invoice is the
    // only thing that raises it, so after activation the balance is exactly
    // the invoice amount, and paying that invoice returns it to zero.
    let install = d(2026, 8, 20);
    let period = current_period(AnchorDay::Fifteenth, install);
    let activation = prorate(Decimal::ZERO, money("1500"), &period, install).unwrap();

    let mut balance = Decimal::ZERO;
    balance += activation.charge;
    assert_eq!(balance, money("1258.06"));

    let entry = payment_ledger_entry(
        activation.charge,
        &reconcile(activation.charge, Decimal::ZERO, activation.charge),
    );
    balance += entry.invoice_settlement + entry.spillover_credit;
    assert_eq!(balance, Decimal::ZERO);
}

#[test]
fn overpaid_invoice_leaves_the_spillover_as_balance_credit() {
    // Invoice for 1000, customer pays 1200: the balance moves by the full
    // payment and ends 200 in credit, with the spillover logged separately.
    let amount_due = money("1000");
    let mut balance = Decimal::ZERO;
    balance += amount_due;

    let entry = payment_ledger_entry(
        money("1200"),
        &reconcile(amount_due, Decimal::ZERO, money("1200")),
    );
    assert_eq!(entry.invoice_settlement, money("-1000"));
    assert_eq!(entry.spillover_credit, money("-200"));

    balance += entry.invoice_settlement + entry.spillover_credit;
    assert_eq!(balance, money("-200"));
}

#[test]
fn upgrade_then_settle_the_adjustment_invoice() {
    // Mid-period upgrade from 1000 to 1500 with 5 of 30 days remaining.
    let proration =
        preview_plan_change(money("1000"), money("1500"), AnchorDay::Fifteenth, d(2026, 7, 10))
            .unwrap();
    assert_eq!(proration.net, money("83.33"));

    // The net becomes an adjustment invoice; paying it exactly settles it
    // with no balance spillover.
    let settled = reconcile(proration.net, Decimal::ZERO, money("83.33"));
    assert_eq!(settled.new_status, InvoiceStatus::Paid);
    assert_eq!(settled.balance_delta, Decimal::ZERO);
}

#[test]
fn downgrade_produces_a_credit_not_an_invoice() {
    let proration =
        preview_plan_change(money("1500"), money("1000"), AnchorDay::Fifteenth, d(2026, 7, 10))
            .unwrap();
    assert!(proration.is_credit());
    assert_eq!(proration.net, money("-83.33"));
}

#[test]
fn monthly_invoice_settled_in_two_payments() {
    let amount_due = money("1500");

    let first = reconcile(amount_due, Decimal::ZERO, money("900"));
    assert_eq!(first.new_status, InvoiceStatus::PartiallyPaid);
    assert_eq!(first.balance_delta, Decimal::ZERO);

    let second = reconcile(amount_due, money("900"), money("700"));
    assert_eq!(second.new_status, InvoiceStatus::Paid);
    // 100 beyond the due amount spills into balance credit.
    assert_eq!(second.balance_delta, money("-100"));
}

#[test]
fn pending_ewallet_payment_applies_nothing_until_approved() {
    // A pending payment never reaches reconcile; approval is the only
    // transition that applies money.
    let pending = VerificationStatus::Pending;
    assert!(!pending.is_terminal());
    assert!(pending.can_transition_to(VerificationStatus::Approved));

    // Double approval is impossible: approved is terminal.
    let approved = VerificationStatus::Approved;
    assert!(!approved.can_transition_to(VerificationStatus::Approved));
    assert!(!approved.can_transition_to(VerificationStatus::Rejected));
}

#[test]
fn billing_run_period_advance_chains_without_gaps() {
    // Advancing from each period end must produce a contiguous next period.
    for anchor in [AnchorDay::Fifteenth, AnchorDay::Thirtieth] {
        let mut period = current_period(anchor, d(2026, 1, 5));
        for _ in 0..24 {
            let next = current_period(anchor, period.end);
            assert_eq!(next.start, period.end, "{:?} gap after {}", anchor, period.end);
            assert!(next.end > next.start);
            period = next;
        }
    }
}

#[test]
fn thirtieth_anchor_survives_february() {
    // Jan 30 -> Feb 28 -> Mar 30: the clamp does not shift later periods.
    let period = current_period(AnchorDay::Thirtieth, d(2026, 1, 30));
    assert_eq!(period.end, d(2026, 2, 28));

    let next = current_period(AnchorDay::Thirtieth, period.end);
    assert_eq!(next.start, d(2026, 2, 28));
    assert_eq!(next.end, d(2026, 3, 30));
}
