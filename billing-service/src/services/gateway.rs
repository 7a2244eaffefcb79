//! E-wallet payment gateway client.
//!
//! Creates charges against a customer's saved payment source and verifies
//! webhook signatures. Reconciliation runs after the gateway confirms,
//! using the gateway-provided amount and reference id as payment inputs.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Currency charges are denominated in.
pub const DEFAULT_CURRENCY: &str = "PHP";

/// Gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
}

/// Gateway client.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

/// Request to create a charge.
#[derive(Debug, Serialize)]
pub struct CreateChargeRequest {
    pub amount: Decimal,
    pub currency: String,
    /// Our reference (invoice id) for tracking.
    pub reference: String,
    /// The saved payment source to charge.
    pub source_id: String,
}

/// A charge as reported by the gateway.
#[derive(Debug, Deserialize)]
pub struct GatewayCharge {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub reference: Option<String>,
    pub created_at: u64,
}

/// Gateway API error response.
#[derive(Debug, Deserialize)]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

/// Webhook event posted by the gateway on charge settlement.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub charge: GatewayCharge,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if the gateway is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.api_base_url.is_empty() && !self.config.api_key.expose_secret().is_empty()
    }

    /// Create a charge against a saved payment source.
    pub async fn create_charge(&self, request: &CreateChargeRequest) -> Result<GatewayCharge> {
        if !self.is_configured() {
            return Err(anyhow!("Payment gateway credentials not configured"));
        }

        let url = format!("{}/charges", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "Gateway create_charge response");

        if status.is_success() {
            let charge: GatewayCharge = serde_json::from_str(&body)?;
            tracing::info!(
                charge_id = %charge.id,
                amount = %charge.amount,
                currency = %charge.currency,
                "Gateway charge created"
            );
            Ok(charge)
        } else {
            let error: GatewayError = serde_json::from_str(&body).unwrap_or_else(|_| GatewayError {
                code: "UNKNOWN".to_string(),
                message: body.clone(),
            });
            tracing::error!(code = %error.code, message = %error.message, "Gateway charge failed");
            Err(anyhow!("Gateway error: {} - {}", error.code, error.message))
        }
    }

    /// Fetch an existing charge by id.
    pub async fn get_charge(&self, charge_id: &str) -> Result<GatewayCharge> {
        if !self.is_configured() {
            return Err(anyhow!("Payment gateway credentials not configured"));
        }

        let url = format!("{}/charges/{}", self.config.api_base_url, charge_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let charge: GatewayCharge = serde_json::from_str(&body)?;
            Ok(charge)
        } else {
            Err(anyhow!("Failed to fetch gateway charge: {}", body))
        }
    }

    /// Verify a webhook signature.
    ///
    /// The signature is computed as `HMAC-SHA256(request_body,
    /// webhook_secret)`, hex encoded.
    pub fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool> {
        let expected = self.compute_signature(body, self.config.webhook_secret.expose_secret())?;
        let is_valid = expected == signature;

        if !is_valid {
            tracing::warn!("Gateway webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Parse a webhook event from the request body.
    pub fn parse_webhook_event(&self, body: &str) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_str(body)?;
        Ok(event)
    }

    fn compute_signature(&self, payload: &str, secret: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| anyhow!("Invalid key length"))?;
        mac.update(payload.as_bytes());
        let result = mac.finalize();
        Ok(hex::encode(result.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            api_base_url: "https://gateway.test/v1".to_string(),
            api_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
        }
    }

    #[test]
    fn configured_when_credentials_present() {
        let client = GatewayClient::new(test_config());
        assert!(client.is_configured());

        let empty = GatewayConfig {
            api_base_url: "".to_string(),
            api_key: Secret::new("".to_string()),
            webhook_secret: Secret::new("".to_string()),
        };
        let client = GatewayClient::new(empty);
        assert!(!client.is_configured());
    }

    #[test]
    fn webhook_signature_round_trips() {
        let client = GatewayClient::new(test_config());
        let body = r#"{"event":"charge.paid","charge":{"id":"ch_1"}}"#;

        let expected = client.compute_signature(body, "whsec_test").unwrap();
        assert!(client.verify_webhook_signature(body, &expected).unwrap());
    }

    #[test]
    fn invalid_webhook_signature_is_rejected() {
        let client = GatewayClient::new(test_config());
        assert!(!client
            .verify_webhook_signature("{}", "deadbeef")
            .unwrap());
    }

    #[test]
    fn webhook_event_parses() {
        let client = GatewayClient::new(test_config());
        let body = r#"{
            "event": "charge.paid",
            "charge": {
                "id": "ch_123",
                "amount": "499.00",
                "currency": "PHP",
                "status": "paid",
                "reference": "inv-1",
                "created_at": 1724572800
            }
        }"#;

        let event = client.parse_webhook_event(body).unwrap();
        assert_eq!(event.event, "charge.paid");
        assert_eq!(event.charge.id, "ch_123");
        assert_eq!(event.charge.amount, "499.00".parse::<Decimal>().unwrap());
    }
}
