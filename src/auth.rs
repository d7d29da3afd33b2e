/// Access control gate
///
/// Request-time authorization as a chain of independent checks: token
/// extraction/verification (axum extractors), then per-operation tier,
/// quota, and verification checks that short-circuit with a specific error.
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use crate::context::AppContext;
use crate::db::account::{Account, SubscriptionTier};
use crate::error::{ApiError, ApiResult};
use crate::quota::{QuotaTracker, UsageCategory};
use crate::token::{AccessClaims, TokenError};

/// Authenticated request context: verified claims plus the loaded account
#[derive(Debug, Clone)]
pub struct Auth {
    pub account: Account,
    pub claims: AccessClaims,
}

#[async_trait]
impl FromRequestParts<AppContext> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = access_token_from_parts(parts).ok_or(ApiError::NoAccessToken)?;

        let claims = state.tokens.verify_access(&token).map_err(|e| match e {
            TokenError::Expired => ApiError::AccessTokenExpired,
            TokenError::Invalid => ApiError::InvalidAccessToken,
        })?;

        let account = state
            .store
            .get_account(&claims.sub)
            .await?
            .ok_or(ApiError::UserNotFound)?;

        Ok(Auth { account, claims })
    }
}

/// Optional authentication: any failure degrades to anonymous instead of
/// rejecting the request
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<Auth>);

#[async_trait]
impl FromRequestParts<AppContext> for OptionalAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(
            Auth::from_request_parts(parts, state).await.ok(),
        ))
    }
}

/// Bearer token from the Authorization header, falling back to the
/// `accessToken` cookie
fn access_token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(token) = crate::api::middleware::extract_bearer_token(&parts.headers) {
        return Some(token);
    }

    CookieJar::from_headers(&parts.headers)
        .get("accessToken")
        .map(|c| c.value().to_string())
}

/// Subscription gate: a lapsed expiry fails regardless of tier, otherwise
/// the tier must meet the minimum ordinal.
pub fn require_tier(account: &Account, minimum: SubscriptionTier) -> ApiResult<()> {
    if let Some(expiry) = account.subscription_expiry {
        if expiry < Utc::now() {
            return Err(ApiError::SubscriptionExpired);
        }
    }

    if account.subscription_tier < minimum {
        return Err(ApiError::InsufficientSubscription(format!(
            "This feature requires the {} plan or higher",
            minimum
        )));
    }

    Ok(())
}

/// Farmer-type gate for operations restricted to certain producer kinds
pub fn require_farmer_type(account: &Account, allowed: &[&str]) -> ApiResult<()> {
    if !allowed.contains(&account.farmer_type.as_str()) {
        return Err(ApiError::InsufficientPermissions(format!(
            "This feature is not available for {} farmers",
            account.farmer_type
        )));
    }
    Ok(())
}

/// Quota gate for metered operations
pub async fn ensure_within_quota(
    quota: &QuotaTracker,
    account: &Account,
    category: UsageCategory,
) -> ApiResult<()> {
    if quota.has_exceeded(account, category).await? {
        return Err(ApiError::ApiLimitExceeded(category.as_str().to_string()));
    }
    Ok(())
}

/// Verification gate for operations limited to confirmed email addresses
pub fn require_verified_email(account: &Account) -> ApiResult<()> {
    if !account.email_verified {
        return Err(ApiError::EmailVerificationRequired);
    }
    Ok(())
}
