/// Account database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Subscription tier, totally ordered for ceiling comparisons
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Enterprise => "enterprise",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "basic" => Ok(SubscriptionTier::Basic),
            "premium" => Ok(SubscriptionTier::Premium),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(format!("unknown subscription tier: {}", other)),
        }
    }
}

/// Account record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub farmer_type: String,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub farm_size_hectares: Option<f64>,
    pub subscription_tier: SubscriptionTier,
    pub subscription_expiry: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub farmer_verified: bool,
    /// SHA-256 digest of the outstanding verification token
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<DateTime<Utc>>,
    /// SHA-256 digest of the outstanding reset token; overwritten, never appended
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Monthly usage record with ceilings frozen at creation
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageRow {
    pub account_id: String,
    pub month: String,
    pub crop_recommendations: i64,
    pub image_processing: i64,
    pub chat_messages: i64,
    pub crop_ceiling: i64,
    pub image_ceiling: i64,
    pub chat_ceiling: i64,
    pub created_at: DateTime<Utc>,
}

/// Login history entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginHistoryRow {
    pub id: i64,
    pub account_id: String,
    pub logged_in_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
