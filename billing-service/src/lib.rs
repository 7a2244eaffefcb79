//! ISP billing service library.
//!
//! Exposes the pure billing core (period calculation, proration, payment
//! reconciliation), the persistence and orchestration layers, and the HTTP
//! surface so integration tests can drive the service in-process.

pub mod billing;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
