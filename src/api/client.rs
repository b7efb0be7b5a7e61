//! Authenticated HTTP client for the donation API
//!
//! Wraps reqwest::Client with bearer-token injection and a one-shot
//! refresh-and-retry when a request comes back 401.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::auth::{Session, TokenStore};
use crate::config::Config;

/// Standard response envelope returned by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<serde_json::Value>,
}

impl<T> ApiResponse<T> {
    fn empty() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            errors: None,
        }
    }

    /// Unwrap the payload, treating `success: false` as a rejection.
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }
        self.data.ok_or_else(|| ApiError::Malformed {
            url: String::new(),
            message: "response envelope has no data".to_string(),
        })
    }

    /// Like `into_data` for endpoints that only acknowledge.
    pub fn into_message(self) -> Result<Option<String>, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }
        Ok(self.message)
    }
}

/// Exchanges a refresh token for a fresh session.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Session, ApiError>;
}

/// Calls `POST /auth/refresh` with a plain client (no token injection).
pub struct HttpRefresher {
    http: reqwest::Client,
    url: String,
}

impl HttpRefresher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: join_url(base_url, "/auth/refresh"),
        })
    }
}

#[async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Session, ApiError> {
        tracing::debug!("POST {}", self.url);
        let resp = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| ApiError::from_transport(e, &self.url))?;

        decode::<Session>(resp, &self.url).await?.into_data()
    }
}

/// Base URL and per-call timeout.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
}

/// An in-flight call plus its one-time retry flag.
struct PendingRequest {
    method: Method,
    url: String,
    body: Option<serde_json::Value>,
    retried: bool,
}

/// Authenticated client for the donation API.
pub struct ApiClient {
    http: reqwest::Client,
    settings: ClientSettings,
    tokens: Arc<dyn TokenStore>,
    refresher: Arc<dyn Refresher>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ApiClient {
    pub fn new(
        settings: ClientSettings,
        tokens: Arc<dyn TokenStore>,
        refresher: Arc<dyn Refresher>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            settings,
            tokens,
            refresher,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Build a client from config with the default `/auth/refresh` refresher.
    pub fn from_config(config: &Config, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let settings = ClientSettings {
            base_url: config.api.base_url.clone(),
            timeout: config.api.timeout(),
        };
        let refresher = HttpRefresher::new(&settings.base_url, settings.timeout)?;
        Self::new(settings, tokens, Arc::new(refresher))
    }

    /// Load config and the on-disk credentials, and build a client.
    pub fn connect() -> Result<Self> {
        let config = Config::load()?;
        let tokens = crate::auth::FileTokenStore::open_default()?;
        Self::from_config(&config, Arc::new(tokens))
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.execute(Method::GET, path, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = to_body(body, path)?;
        self.execute(Method::POST, path, Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = to_body(body, path)?;
        self.execute(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = to_body(body, path)?;
        self.execute(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.execute(Method::DELETE, path, None).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let mut pending = PendingRequest {
            method,
            url: join_url(&self.settings.base_url, path),
            body,
            retried: false,
        };

        loop {
            let token = self.tokens.access_token();
            let resp = self.dispatch(&pending, token.as_deref()).await?;

            if resp.status() == StatusCode::UNAUTHORIZED && !pending.retried {
                pending.retried = true;
                if self.refresh_session(token.as_deref()).await? {
                    continue;
                }
            }

            return decode(resp, &pending.url).await;
        }
    }

    async fn dispatch(
        &self,
        req: &PendingRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(
            "{} {} [{}]{}",
            req.method,
            req.url,
            request_id,
            if req.retried { " (retry)" } else { "" }
        );

        let mut builder = self
            .http
            .request(req.method.clone(), &req.url)
            .header(ACCEPT, "application/json")
            .header("X-Request-Id", request_id);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        builder
            .send()
            .await
            .map_err(|e| ApiError::from_transport(e, &req.url))
    }

    /// Obtain a usable session after a 401 sent with `stale_token`.
    ///
    /// Returns `Ok(false)` when there is no refresh token (the caller
    /// surfaces the original 401). A failed refresh clears the store and
    /// returns `SessionExpired`.
    async fn refresh_session(&self, stale_token: Option<&str>) -> Result<bool, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let Some(session) = self.tokens.session() else {
            tracing::debug!("401 with no refresh token stored");
            return Ok(false);
        };

        // Another request rotated the tokens while we waited on the lock
        if Some(session.access_token.as_str()) != stale_token {
            tracing::debug!("Session already refreshed, reissuing request");
            return Ok(true);
        }

        tracing::info!("Access token rejected, refreshing session...");
        match self.refresher.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.tokens.store(fresh)?;
                tracing::info!("Session refreshed");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                if let Err(clear_err) = self.tokens.clear() {
                    tracing::warn!("Failed to clear stored tokens: {}", clear_err);
                }
                Err(ApiError::SessionExpired(e.to_string()))
            }
        }
    }
}

/// RFC 3986 unreserved characters stay literal in a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Escape an identifier for use as a single path segment.
pub(crate) fn encode_segment(id: &str) -> String {
    utf8_percent_encode(id, PATH_SEGMENT).to_string()
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn to_body<B: Serialize + ?Sized>(body: &B, path: &str) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Malformed {
        url: path.to_string(),
        message: format!("request body: {}", e),
    })
}

/// Check the status code and decode the envelope.
async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
    url: &str,
) -> Result<ApiResponse<T>, ApiError> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ApiError::from_transport(e, url))?;

    if !status.is_success() {
        let (message, errors) = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&bytes)
            .map(|env| (env.message, env.errors))
            .unwrap_or_default();
        let message = message.or_else(|| {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        });
        return Err(ApiError::from_status(status, url, message, errors));
    }

    if bytes.is_empty() {
        return Ok(ApiResponse::empty());
    }

    serde_json::from_slice(&bytes).map_err(|e| ApiError::Malformed {
        url: url.to_string(),
        message: e.to_string(),
    })
}
