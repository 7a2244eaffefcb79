//! Configuration for billing-service, loaded from environment variables.

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

use crate::services::gateway::GatewayConfig;
use crate::services::mikrotik::MikrotikConfig;

#[derive(Deserialize, Clone, Debug)]
pub struct BillingConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub mikrotik: MikrotikConfig,
    pub gateway: GatewayConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("BILLING_DATABASE_URL")
            .map_err(|_| anyhow!("BILLING_DATABASE_URL must be set"))?;
        let max_connections = env::var("BILLING_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let min_connections = env::var("BILLING_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        let mikrotik = MikrotikConfig {
            base_url: env::var("MIKROTIK_BASE_URL").unwrap_or_default(),
            username: env::var("MIKROTIK_USERNAME").unwrap_or_default(),
            password: Secret::new(env::var("MIKROTIK_PASSWORD").unwrap_or_default()),
        };

        let gateway = GatewayConfig {
            api_base_url: env::var("GATEWAY_API_BASE_URL").unwrap_or_default(),
            api_key: Secret::new(env::var("GATEWAY_API_KEY").unwrap_or_default()),
            webhook_secret: Secret::new(env::var("GATEWAY_WEBHOOK_SECRET").unwrap_or_default()),
        };

        let log_level = env::var("BILLING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("OTLP_ENDPOINT").ok();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            mikrotik,
            gateway,
            service_name: "billing-service".to_string(),
            log_level,
            otlp_endpoint,
        })
    }
}
