/// Account request/response types
///
/// Every operation takes an explicit typed request; validation is a pure
/// step from raw input to the typed struct before any store access.

mod store;

pub use store::{CredentialStore, NewAccount, ProfilePatch};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::db::account::{Account, SubscriptionTier};

/// Sign-up request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(
        length(min = 3, max = 30, message = "must be between 3 and 30 characters"),
        custom(function = validate_username)
    )]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "must be between 8 and 128 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "must not be empty"))]
    pub full_name: String,
    pub phone: Option<String>,
    /// Defaults to "crop" when absent
    pub farmer_type: Option<String>,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub farm_size_hectares: Option<f64>,
}

/// Sign-in request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SigninRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Forgot-password request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

/// Reset-password request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub token: String,
    #[validate(length(min = 8, max = 128, message = "must be between 8 and 128 characters"))]
    pub new_password: String,
}

/// Email verification request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub token: String,
}

/// Refresh request. The token may also arrive via cookie.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Change-password request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub current_password: String,
    #[validate(length(min = 8, max = 128, message = "must be between 8 and 128 characters"))]
    pub new_password: String,
}

/// Account deletion request; the password re-confirmation is mandatory
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub password: String,
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "must not be empty"))]
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub farmer_type: Option<String>,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub farm_size_hectares: Option<f64>,
}

/// Account view safe to return to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccount {
    pub id: String,
    pub email: String,
    pub username: String,
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
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<Account> for PublicAccount {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            username: account.username,
            full_name: account.full_name,
            phone: account.phone,
            farmer_type: account.farmer_type,
            farm_name: account.farm_name,
            farm_location: account.farm_location,
            farm_size_hectares: account.farm_size_hectares,
            subscription_tier: account.subscription_tier,
            subscription_expiry: account.subscription_expiry,
            email_verified: account.email_verified,
            phone_verified: account.phone_verified,
            farmer_verified: account.farmer_verified,
            created_at: account.created_at,
            last_login: account.last_login,
        }
    }
}

/// Access + refresh token pair issued on signup, signin, and refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session payload returned by signup/signin/refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: PublicAccount,
    pub access_token: String,
    pub refresh_token: String,
}

impl SessionData {
    pub fn new(account: Account, pair: &TokenPair) -> Self {
        Self {
            user: account.into(),
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
        }
    }
}

fn validate_username(username: &str) -> Result<(), ValidationError> {
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        let mut err = ValidationError::new("username");
        err.message = Some("may only contain letters, digits, underscores and dashes".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signup_validation() {
        let valid = SignupRequest {
            email: "farmer@example.com".to_string(),
            username: "farmer_1".to_string(),
            password: "a-strong-password".to_string(),
            full_name: "Test Farmer".to_string(),
            phone: None,
            farmer_type: None,
            farm_name: None,
            farm_location: None,
            farm_size_hectares: None,
        };
        assert!(valid.validate().is_ok());

        let mut bad_email = valid.clone();
        bad_email.email = "not-an-email".to_string();
        assert!(bad_email.validate().is_err());

        let mut short_password = valid.clone();
        short_password.password = "short".to_string();
        assert!(short_password.validate().is_err());

        let mut bad_username = valid;
        bad_username.username = "no spaces!".to_string();
        assert!(bad_username.validate().is_err());
    }
}
