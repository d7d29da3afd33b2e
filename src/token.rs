/// Token service: issuance and verification of signed credential tokens
///
/// Two disjoint token kinds are minted, each HS256-signed with its own
/// secret: short-lived access tokens carrying the account's authorization
/// claims, and long-lived refresh tokens carrying only identity. Access
/// tokens are never individually revocable before expiry; refresh-token
/// revocation is the credential store's concern (set membership), not this
/// module's.
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::db::account::{Account, SubscriptionTier};

/// Claims embedded in every access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject -- the account id
    pub sub: String,
    pub email: String,
    pub username: String,
    pub tier: SubscriptionTier,
    pub farmer_type: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims embedded in every refresh token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Tagged verification outcome. Callers match exhaustively; there is no
/// exception hierarchy to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

/// Signs and verifies both token kinds
#[derive(Clone)]
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    access_ttl_mins: i64,
    refresh_ttl_days: i64,
    remember_me_ttl_days: i64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access_secret: config.access_token_secret.clone(),
            refresh_secret: config.refresh_token_secret.clone(),
            access_ttl_mins: config.access_token_ttl_mins,
            refresh_ttl_days: config.refresh_token_ttl_days,
            remember_me_ttl_days: config.remember_me_ttl_days,
        }
    }

    /// Issue a short-lived access token for the account
    pub fn issue_access_token(&self, account: &Account) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: account.id.clone(),
            email: account.email.clone(),
            username: account.username.clone(),
            tier: account.subscription_tier,
            farmer_type: account.farmer_type.clone(),
            iat: now,
            exp: now + self.access_ttl_mins * 60,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .map_err(|_| TokenError::Invalid)
    }

    /// Issue a long-lived refresh token. `remember` extends the signed
    /// expiry itself, so the transport cookie can never outlive the token's
    /// cryptographic validity.
    pub fn issue_refresh_token(
        &self,
        account: &Account,
        remember: bool,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl_days = if remember {
            self.remember_me_ttl_days
        } else {
            self.refresh_ttl_days
        };

        let claims = RefreshClaims {
            sub: account.id.clone(),
            email: account.email.clone(),
            iat: now,
            exp: now + ttl_days * 24 * 3600,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
        .map_err(|_| TokenError::Invalid)
    }

    /// Pure signature + expiry check; no store lookup
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(map_jwt_error)
    }

    /// Pure signature + expiry check. Membership in the account's live set
    /// is the caller's responsibility, so revocation and cryptographic
    /// death stay distinguishable.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(map_jwt_error)
    }

    /// Wall-clock instant at which a refresh token issued now would expire
    pub fn refresh_expiry(&self, remember: bool) -> DateTime<Utc> {
        let ttl_days = if remember {
            self.remember_me_ttl_days
        } else {
            self.refresh_ttl_days
        };
        Utc::now() + chrono::Duration::days(ttl_days)
    }

    /// Access token lifetime, for cookie max-age
    pub fn access_ttl_mins(&self) -> i64 {
        self.access_ttl_mins
    }

    /// Refresh token lifetime in days, for cookie max-age
    pub fn refresh_ttl_days(&self, remember: bool) -> i64 {
        if remember {
            self.remember_me_ttl_days
        } else {
            self.refresh_ttl_days
        }
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}
