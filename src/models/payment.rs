//! Payment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider identifier of the MoneyFusion gateway
pub const MONEYFUSION: &str = "moneyfusion";

/// Backend-side payment status; decoding is case-insensitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PaymentStatus {
    Initialized,
    Pending,
    Processing,
    Paid,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Unknown,
}

impl From<String> for PaymentStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl PaymentStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "initialized" => Self::Initialized,
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "paid" => Self::Paid,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "expired" => Self::Expired,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment attempt for a donation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub donation_id: String,
    pub provider: String,
    pub status: PaymentStatus,
    pub amount: f64,
    pub currency: String,
    pub external_transaction_id: Option<String>,
    /// Provider-issued token used for direct status checks
    #[serde(alias = "tokenPay", alias = "providerToken")]
    pub verification_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_moneyfusion(&self) -> bool {
        self.provider.eq_ignore_ascii_case(MONEYFUSION)
    }
}

/// Most recently created record; ties keep the first in input order.
pub fn latest_payment(payments: &[PaymentRecord]) -> Option<&PaymentRecord> {
    let mut sorted: Vec<&PaymentRecord> = payments.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted.into_iter().next()
}
