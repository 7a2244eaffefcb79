//! Service layer: persistence, external connectors and orchestration.

pub mod database;
pub mod gateway;
pub mod metrics;
pub mod mikrotik;
pub mod operations;

pub use database::Database;
pub use gateway::{GatewayClient, GatewayConfig};
pub use metrics::{get_metrics, init_metrics};
pub use mikrotik::{MikrotikClient, MikrotikConfig, NewRouterAccount};
pub use operations::BillingOps;
