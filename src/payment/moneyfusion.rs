//! MoneyFusion transaction status check
//!
//! MoneyFusion notifies the backend through a webhook, which can lag behind
//! the user returning to the app. The provider's status endpoint is the
//! authoritative answer, queried with the token issued when the payment
//! was created.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::classify::Outcome;
use crate::api::client::encode_segment;
use crate::api::ApiError;

/// Status reported by a payment provider, in the provider's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus(pub String);

impl ProviderStatus {
    /// `paid` / `pending` / `failed`; anything else is informational.
    pub fn outcome(&self) -> Outcome {
        match self.0.to_lowercase().as_str() {
            "paid" => Outcome::Success,
            "pending" => Outcome::Processing,
            "failed" => Outcome::Failed,
            _ => Outcome::Informational(self.0.clone()),
        }
    }
}

/// Direct status check against a third-party payment provider.
#[async_trait]
pub trait ProviderVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<ProviderStatus, ApiError>;
}

#[derive(Debug, Deserialize)]
struct NotifResponse {
    statut: bool,
    data: Option<NotifData>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotifData {
    statut: String,
    #[serde(rename = "numeroTransaction")]
    transaction_number: Option<String>,
}

pub struct MoneyFusionVerifier {
    http: reqwest::Client,
    status_url: String,
}

impl MoneyFusionVerifier {
    pub fn new(status_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            status_url: status_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProviderVerifier for MoneyFusionVerifier {
    async fn verify(&self, token: &str) -> Result<ProviderStatus, ApiError> {
        let url = format!("{}/{}", self.status_url, encode_segment(token));
        tracing::debug!("MoneyFusion GET {}", self.status_url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::ProviderVerification(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::ProviderVerification(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let body: NotifResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::ProviderVerification(format!("bad response: {}", e)))?;

        match body.data {
            Some(data) if body.statut => {
                tracing::debug!(
                    "MoneyFusion transaction {} is {}",
                    data.transaction_number.as_deref().unwrap_or("?"),
                    data.statut
                );
                Ok(ProviderStatus(data.statut))
            }
            _ => Err(ApiError::ProviderVerification(
                body.message
                    .unwrap_or_else(|| "transaction not found".to_string()),
            )),
        }
    }
}
