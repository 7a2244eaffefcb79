//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers;
use crate::services::{metrics, BillingOps, Database, GatewayClient, MikrotikClient};
use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub ops: BillingOps,
    pub gateway: GatewayClient,
    pub config: BillingConfig,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build without running migrations (used by test harnesses that manage
    /// the schema themselves).
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        if run_migrations {
            db.run_migrations().await?;
        }

        let router = MikrotikClient::new(config.mikrotik.clone());
        if router.is_configured() {
            tracing::info!("MikroTik client initialized");
        } else {
            tracing::warn!("MikroTik credentials not configured - router sync will be skipped");
        }

        let gateway = GatewayClient::new(config.gateway.clone());
        if gateway.is_configured() {
            tracing::info!("Payment gateway client initialized");
        } else {
            tracing::warn!("Gateway credentials not configured - e-wallet charges unavailable");
        }

        let ops = BillingOps::new(db.clone(), router);

        let state = AppState {
            db,
            ops,
            gateway,
            config: config.clone(),
        };

        // Port 0 = random port for testing
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("billing-service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::record_http_request(&method, response.status().as_str());
    metrics::record_http_request_duration(&method, start.elapsed().as_secs_f64());

    response
}

/// Build the HTTP router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/customers",
            post(handlers::customers::create_customer).get(handlers::customers::list_customers),
        )
        .route("/customers/:customer_id", get(handlers::customers::get_customer))
        .route(
            "/business-units",
            post(handlers::customers::create_business_unit)
                .get(handlers::customers::list_business_units),
        )
        .route(
            "/plans",
            post(handlers::plans::create_plan).get(handlers::plans::list_plans),
        )
        .route(
            "/plans/:plan_id",
            get(handlers::plans::get_plan)
                .put(handlers::plans::update_plan)
                .delete(handlers::plans::deactivate_plan),
        )
        .route(
            "/subscriptions",
            post(handlers::subscriptions::create_subscription)
                .get(handlers::subscriptions::list_subscriptions),
        )
        .route(
            "/subscriptions/:subscription_id",
            get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/suspend",
            post(handlers::subscriptions::suspend_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/plan-change/preview",
            post(handlers::subscriptions::preview_plan_change),
        )
        .route(
            "/subscriptions/:subscription_id/plan-change",
            post(handlers::subscriptions::change_plan),
        )
        .route(
            "/subscriptions/:subscription_id/adjustments",
            post(handlers::subscriptions::create_manual_adjustment)
                .get(handlers::subscriptions::list_adjustments),
        )
        .route("/billing/run", post(handlers::subscriptions::run_billing_cycle))
        .route("/invoices", get(handlers::invoices::list_invoices))
        .route("/invoices/:invoice_id", get(handlers::invoices::get_invoice))
        .route(
            "/payments",
            post(handlers::payments::record_payment).get(handlers::payments::list_payments),
        )
        .route("/payments/:payment_id", get(handlers::payments::get_payment))
        .route(
            "/payments/:payment_id/approve",
            post(handlers::payments::approve_payment),
        )
        .route(
            "/payments/:payment_id/reject",
            post(handlers::payments::reject_payment),
        )
        .route("/webhooks/gateway", post(handlers::payments::gateway_webhook))
        .route(
            "/expenses",
            post(handlers::expenses::create_expense).get(handlers::expenses::list_expenses),
        )
        .route(
            "/portal/:customer_id",
            get(handlers::portal::portal_overview),
        )
        .route(
            "/portal/:customer_id/invoices",
            get(handlers::portal::portal_invoices),
        )
        .route(
            "/portal/:customer_id/payments",
            get(handlers::portal::portal_payments),
        )
        .route(
            "/portal/:customer_id/invoices/:invoice_id/pay",
            post(handlers::portal::pay_invoice),
        )
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
