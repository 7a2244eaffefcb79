//! Domain models for the ISP billing service.

mod adjustment;
mod business_unit;
mod customer;
mod expense;
mod invoice;
mod payment;
mod plan;
mod subscription;

pub use adjustment::{AdjustmentReason, BalanceAdjustment};
pub use business_unit::BusinessUnit;
pub use customer::{CreateCustomer, Customer, ListCustomersFilter};
pub use expense::{CreateExpense, Expense, ListExpensesFilter};
pub use invoice::{Invoice, InvoiceStatus, ListInvoicesFilter};
pub use payment::{ListPaymentsFilter, Payment, PaymentMethod, RecordPayment, VerificationStatus};
pub use plan::{CreatePlan, Plan, UpdatePlan};
pub use subscription::{CreateSubscription, ListSubscriptionsFilter, Subscription};
