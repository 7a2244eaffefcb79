//! Payment reconciliation against an invoice.
//!
//! Only approved payments count toward an invoice. Balance deltas cover
//! spillover credit only; the amount applied to the invoice itself is
//! settled separately by the caller.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::InvoiceStatus;

/// Result of applying one payment to an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub new_status: InvoiceStatus,
    /// Spillover credit created by this payment (zero or negative).
    pub balance_delta: Decimal,
}

/// Signed subscription-balance movements produced by one approved payment.
///
/// `invoice_settlement` covers the portion applied to the invoice itself;
/// `spillover_credit` is the overpayment recorded as a ledger adjustment.
/// Their sum is always `-amount`, so an exact settlement nets the invoice's
/// earlier `+amount_due` back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub invoice_settlement: Decimal,
    pub spillover_credit: Decimal,
}

/// Split an approved payment into its balance movements.
pub fn payment_ledger_entry(amount: Decimal, reconciliation: &Reconciliation) -> LedgerEntry {
    let spillover = reconciliation.balance_delta;
    LedgerEntry {
        invoice_settlement: -(amount + spillover),
        spillover_credit: spillover,
    }
}

/// Derive an invoice's status from the sum of its approved payments.
///
/// An invoice with nothing outstanding is settled; that includes the
/// degenerate zero-due invoice, which is paid from the start.
pub fn derive_status(amount_due: Decimal, approved_total: Decimal) -> InvoiceStatus {
    if approved_total >= amount_due {
        InvoiceStatus::Paid
    } else if approved_total > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Unpaid
    }
}

/// Apply a newly approved payment of `new_amount` to an invoice with
/// `approved_before` already settled against it.
///
/// Overpayment beyond `amount_due` spills into the subscription balance as
/// credit. The delta covers only spillover created by this payment, so the
/// computation is idempotent per payment.
pub fn reconcile(
    amount_due: Decimal,
    approved_before: Decimal,
    new_amount: Decimal,
) -> Reconciliation {
    let total = approved_before + new_amount;

    let spill_before = (approved_before - amount_due).max(Decimal::ZERO);
    let spill_after = (total - amount_due).max(Decimal::ZERO);

    Reconciliation {
        new_status: derive_status(amount_due, total),
        balance_delta: -(spill_after - spill_before),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn exact_settlement_is_paid_with_no_spillover() {
        let result = reconcile(money("1000"), Decimal::ZERO, money("1000"));
        assert_eq!(result.new_status, InvoiceStatus::Paid);
        assert_eq!(result.balance_delta, Decimal::ZERO);
    }

    #[test]
    fn partial_settlement_is_partially_paid() {
        let result = reconcile(money("1000"), Decimal::ZERO, money("600"));
        assert_eq!(result.new_status, InvoiceStatus::PartiallyPaid);
        assert_eq!(result.balance_delta, Decimal::ZERO);
    }

    #[test]
    fn overpayment_spills_into_balance_credit() {
        let result = reconcile(money("1000"), Decimal::ZERO, money("1200"));
        assert_eq!(result.new_status, InvoiceStatus::Paid);
        assert_eq!(result.balance_delta, money("-200"));
    }

    #[test]
    fn spillover_counts_only_the_new_payment() {
        // Invoice already overpaid; a further payment spills in full.
        let result = reconcile(money("1000"), money("1100"), money("50"));
        assert_eq!(result.new_status, InvoiceStatus::Paid);
        assert_eq!(result.balance_delta, money("-50"));
    }

    #[test]
    fn second_payment_crossing_the_due_amount_spills_the_excess() {
        let result = reconcile(money("1000"), money("600"), money("500"));
        assert_eq!(result.new_status, InvoiceStatus::Paid);
        assert_eq!(result.balance_delta, money("-100"));
    }

    #[test]
    fn zero_total_is_unpaid() {
        let result = reconcile(money("1000"), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(result.new_status, InvoiceStatus::Unpaid);
        assert_eq!(result.balance_delta, Decimal::ZERO);
    }

    #[test]
    fn exact_settlement_nets_the_invoice_charge_to_zero() {
        // An invoice raises the balance by amount_due; paying it exactly
        // must move the balance back by the same amount.
        let due = money("1258.06");
        let entry = payment_ledger_entry(due, &reconcile(due, Decimal::ZERO, due));
        assert_eq!(due + entry.invoice_settlement, Decimal::ZERO);
        assert_eq!(entry.spillover_credit, Decimal::ZERO);
    }

    #[test]
    fn overpayment_splits_into_settlement_and_credit() {
        let entry = payment_ledger_entry(
            money("1200"),
            &reconcile(money("1000"), Decimal::ZERO, money("1200")),
        );
        assert_eq!(entry.invoice_settlement, money("-1000"));
        assert_eq!(entry.spillover_credit, money("-200"));
    }

    #[test]
    fn ledger_movements_always_sum_to_the_payment_amount() {
        for (due, before, amount) in [
            ("1000", "0", "600"),
            ("1000", "600", "500"),
            ("1000", "1100", "50"),
            ("1258.06", "0", "1258.06"),
        ] {
            let amount = money(amount);
            let entry =
                payment_ledger_entry(amount, &reconcile(money(due), money(before), amount));
            assert_eq!(entry.invoice_settlement + entry.spillover_credit, -amount);
        }
    }

    #[test]
    fn zero_due_invoice_is_settled_from_the_start() {
        assert_eq!(derive_status(Decimal::ZERO, Decimal::ZERO), InvoiceStatus::Paid);
    }

    #[test]
    fn derive_status_covers_all_bands() {
        assert_eq!(derive_status(money("1000"), Decimal::ZERO), InvoiceStatus::Unpaid);
        assert_eq!(
            derive_status(money("1000"), money("600")),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(derive_status(money("1000"), money("1000")), InvoiceStatus::Paid);
        assert_eq!(derive_status(money("1000"), money("1200")), InvoiceStatus::Paid);
    }
}
