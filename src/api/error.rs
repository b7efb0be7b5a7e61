//! Error taxonomy for calls against the donation API

use reqwest::StatusCode;

/// Categorized failure of an API call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// 401 that was not (or could no longer be) recovered by a refresh.
    #[error("401 Unauthorized for {url}")]
    Unauthorized { url: String, message: Option<String> },

    /// Refresh failed; stored credentials have been cleared.
    #[error("Session expired, please log in again: {0}")]
    SessionExpired(String),

    #[error("{message}")]
    Validation {
        message: String,
        errors: Option<serde_json::Value>,
    },

    #[error("Not found: {url}")]
    NotFound { url: String, message: Option<String> },

    #[error("HTTP {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("Malformed response from {url}: {message}")]
    Malformed { url: String, message: String },

    /// 2xx response whose envelope reports `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Payment provider verification failed: {0}")]
    ProviderVerification(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// True when the caller should treat the user as logged out.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::SessionExpired(_))
    }

    /// Categorize a transport-level reqwest failure.
    pub(crate) fn from_transport(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            Self::Malformed {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Categorize a non-success HTTP status, carrying the envelope's
    /// message and errors when the body had them.
    pub(crate) fn from_status(
        status: StatusCode,
        url: &str,
        message: Option<String>,
        errors: Option<serde_json::Value>,
    ) -> Self {
        let url = url.to_string();
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized { url, message },
            StatusCode::NOT_FOUND => Self::NotFound { url, message },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::Validation {
                message: message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
                errors,
            },
            _ => Self::Status {
                status: status.as_u16(),
                url,
                message: message.unwrap_or_default(),
            },
        }
    }
}
