//! Donation models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A donation as returned by `GET /donations/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub status: Option<String>,
    pub campaign_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}
