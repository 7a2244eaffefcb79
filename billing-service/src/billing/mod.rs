//! Pure billing core: period calculation, proration and payment
//! reconciliation. No I/O here; the database layer calls into these.

mod period;
mod proration;
mod reconciliation;

pub use period::{current_period, AnchorDay, BillingPeriod};
pub use proration::{preview_plan_change, prorate, round_money, ProrationResult};
pub use reconciliation::{
    derive_status, payment_ledger_entry, reconcile, LedgerEntry, Reconciliation,
};
