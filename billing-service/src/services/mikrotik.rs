//! MikroTik RouterOS connector.
//!
//! Talks to the router's REST API for PPPoE secret provisioning. The
//! primary form addresses a secret by name; on a transport-level failure it
//! falls back once to the command-style `set`/`add` endpoints that older
//! RouterOS builds expose. Callers treat every failure here as non-fatal to
//! the billing flow.

use anyhow::{anyhow, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Connection settings for the RouterOS REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct MikrotikConfig {
    pub base_url: String,
    pub username: String,
    pub password: Secret<String>,
}

/// Input for provisioning a new PPPoE account on the router.
#[derive(Debug, Clone, Serialize)]
pub struct NewRouterAccount {
    pub name: String,
    pub password: String,
    pub service: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// RouterOS REST client.
#[derive(Clone)]
pub struct MikrotikClient {
    client: Client,
    config: MikrotikConfig,
}

impl MikrotikClient {
    pub fn new(config: MikrotikConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    /// Check if the router connection is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty() && !self.config.username.is_empty()
    }

    /// Move a PPPoE account to a different profile.
    ///
    /// Primary: `PATCH /rest/ppp/secret/{name}`. Fallback: the command form
    /// `POST /rest/ppp/secret/set` addressing the secret by number.
    pub async fn update_profile(&self, account_name: &str, profile: &str) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("MikroTik credentials not configured"));
        }

        let url = format!("{}/rest/ppp/secret/{}", self.config.base_url, account_name);
        let body = json!({ "profile": profile });

        match self.send(self.client.patch(&url).json(&body)).await {
            Ok(()) => {
                tracing::info!(account = %account_name, profile = %profile, "Router profile updated");
                Ok(())
            }
            Err(primary_err) => {
                tracing::warn!(
                    account = %account_name,
                    error = %primary_err,
                    "REST profile update failed, trying command form"
                );

                let fallback_url = format!("{}/rest/ppp/secret/set", self.config.base_url);
                let fallback_body = json!({
                    ".id": account_name,
                    "profile": profile,
                });

                self.send(self.client.post(&fallback_url).json(&fallback_body))
                    .await
                    .map_err(|fallback_err| {
                        anyhow!(
                            "Router profile update failed: {} (fallback: {})",
                            primary_err,
                            fallback_err
                        )
                    })?;

                tracing::info!(account = %account_name, profile = %profile, "Router profile updated via command form");
                Ok(())
            }
        }
    }

    /// Provision a new PPPoE account.
    ///
    /// Primary: `PUT /rest/ppp/secret`. Fallback: `POST /rest/ppp/secret/add`.
    pub async fn add_account(&self, account: &NewRouterAccount) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("MikroTik credentials not configured"));
        }

        let url = format!("{}/rest/ppp/secret", self.config.base_url);

        match self.send(self.client.put(&url).json(account)).await {
            Ok(()) => {
                tracing::info!(account = %account.name, profile = %account.profile, "Router account created");
                Ok(())
            }
            Err(primary_err) => {
                tracing::warn!(
                    account = %account.name,
                    error = %primary_err,
                    "REST account creation failed, trying command form"
                );

                let fallback_url = format!("{}/rest/ppp/secret/add", self.config.base_url);
                self.send(self.client.post(&fallback_url).json(account))
                    .await
                    .map_err(|fallback_err| {
                        anyhow!(
                            "Router account creation failed: {} (fallback: {})",
                            primary_err,
                            fallback_err
                        )
                    })?;

                tracing::info!(account = %account.name, "Router account created via command form");
                Ok(())
            }
        }
    }

    /// Disable a PPPoE account, cutting the customer's session on next
    /// reconnect.
    pub async fn disable_account(&self, account_name: &str) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("MikroTik credentials not configured"));
        }

        let url = format!("{}/rest/ppp/secret/{}", self.config.base_url, account_name);
        let body = json!({ "disabled": "yes" });

        self.send(self.client.patch(&url).json(&body)).await?;
        tracing::info!(account = %account_name, "Router account disabled");
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<()> {
        let response = request
            .basic_auth(&self.config.username, Some(self.config.password.expose_secret()))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!("RouterOS returned {}: {}", status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MikrotikConfig {
        MikrotikConfig {
            base_url: "https://192.0.2.1".to_string(),
            username: "api".to_string(),
            password: Secret::new("secret".to_string()),
        }
    }

    #[test]
    fn configured_when_url_and_user_present() {
        let client = MikrotikClient::new(test_config());
        assert!(client.is_configured());

        let empty = MikrotikConfig {
            base_url: "".to_string(),
            username: "".to_string(),
            password: Secret::new("".to_string()),
        };
        let client = MikrotikClient::new(empty);
        assert!(!client.is_configured());
    }

    #[test]
    fn account_serializes_without_empty_comment() {
        let account = NewRouterAccount {
            name: "juan.delacruz".to_string(),
            password: "pw".to_string(),
            service: "pppoe".to_string(),
            profile: "plan-20mbps".to_string(),
            comment: None,
        };
        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["name"], "juan.delacruz");
        assert!(value.get("comment").is_none());
    }
}
