/// Session lifecycle management
///
/// Orchestrates the account-session state machine: sign-up, sign-in,
/// refresh with one-time-use rotation, sign-out (single or all devices),
/// password change/reset, and account deletion. Composes the token service
/// with the credential store; only the store decides refresh-token set
/// membership.
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::account::{CredentialStore, NewAccount, ProfilePatch, SignupRequest, TokenPair};
use crate::db::account::Account;
use crate::error::{ApiError, ApiResult};
use crate::token::{TokenError, TokenService};

/// Outcome of a forgot-password request when the account exists. The
/// plaintext token leaves the process only inside the reset email.
#[derive(Debug, Clone)]
pub struct ResetIssued {
    pub token: String,
    pub email: String,
    pub username: String,
}

/// Outcome of issuing an email-verification token
#[derive(Debug, Clone)]
pub struct VerificationIssued {
    pub token: String,
    pub email: String,
    pub username: String,
}

#[derive(Clone)]
pub struct SessionManager {
    store: CredentialStore,
    tokens: TokenService,
    reset_token_ttl_mins: i64,
    verification_token_ttl_hours: i64,
}

impl SessionManager {
    pub fn new(
        store: CredentialStore,
        tokens: TokenService,
        reset_token_ttl_mins: i64,
        verification_token_ttl_hours: i64,
    ) -> Self {
        Self {
            store,
            tokens,
            reset_token_ttl_mins,
            verification_token_ttl_hours,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Create an account and open its first session
    pub async fn sign_up(&self, req: SignupRequest) -> ApiResult<(Account, TokenPair)> {
        if self.store.email_exists(&req.email).await? {
            return Err(ApiError::EmailExists);
        }
        if self.store.username_exists(&req.username).await? {
            return Err(ApiError::UsernameExists);
        }

        let password_hash = crate::password::hash(&req.password)?;

        let account = self
            .store
            .create_account(NewAccount {
                email: req.email,
                username: req.username,
                password_hash,
                full_name: req.full_name,
                phone: req.phone,
                farmer_type: req.farmer_type.unwrap_or_else(|| "crop".to_string()),
                farm_name: req.farm_name,
                farm_location: req.farm_location,
                farm_size_hectares: req.farm_size_hectares,
            })
            .await?;

        let pair = self.open_session(&account, false).await?;
        self.store.record_login(&account.id, None, None).await?;

        tracing::info!(account_id = %account.id, "account created");
        Ok((account, pair))
    }

    /// Authenticate by email and password. Unknown email and wrong password
    /// are indistinguishable from outside.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> ApiResult<(Account, TokenPair)> {
        let account = self
            .store
            .get_account_by_email(email)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if !account.active {
            return Err(ApiError::InvalidCredentials);
        }

        if !crate::password::verify(password, &account.password_hash)? {
            return Err(ApiError::InvalidCredentials);
        }

        let pair = self.open_session(&account, remember).await?;
        self.store.touch_last_login(&account.id).await?;
        self.store.record_login(&account.id, None, None).await?;

        Ok((account, pair))
    }

    /// Exchange a live refresh token for a fresh pair. The presented token
    /// must verify cryptographically AND still be in the account's live
    /// set; the consumed token never works again.
    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<(Account, TokenPair)> {
        let claims = self.tokens.verify_refresh(refresh_token).map_err(|e| match e {
            TokenError::Expired => ApiError::RefreshTokenExpired,
            TokenError::Invalid => ApiError::InvalidRefreshToken,
        })?;

        let account = self
            .store
            .get_account(&claims.sub)
            .await?
            .ok_or(ApiError::InvalidRefreshToken)?;

        let new_refresh = self
            .tokens
            .issue_refresh_token(&account, false)
            .map_err(|_| ApiError::Internal("Token signing failed".to_string()))?;

        let rotated = self
            .store
            .rotate_refresh_token(
                &account.id,
                refresh_token,
                &new_refresh,
                self.tokens.refresh_expiry(false),
            )
            .await?;
        if !rotated {
            // Well-signed but revoked or already rotated
            return Err(ApiError::InvalidRefreshToken);
        }

        let access_token = self
            .tokens
            .issue_access_token(&account)
            .map_err(|_| ApiError::Internal("Token signing failed".to_string()))?;

        Ok((
            account,
            TokenPair {
                access_token,
                refresh_token: new_refresh,
            },
        ))
    }

    /// End the session holding the presented refresh token. Idempotent.
    pub async fn sign_out(&self, account_id: &str, refresh_token: Option<&str>) -> ApiResult<()> {
        if let Some(token) = refresh_token {
            self.store.remove_refresh_token(account_id, token).await?;
        }
        Ok(())
    }

    /// End every session for the account
    pub async fn sign_out_all(&self, account_id: &str) -> ApiResult<u64> {
        let removed = self.store.clear_refresh_tokens(account_id).await?;
        tracing::info!(account_id, removed, "signed out of all devices");
        Ok(removed)
    }

    /// Replace the password and force re-authentication everywhere
    pub async fn change_password(
        &self,
        account: &Account,
        current_password: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        if !crate::password::verify(current_password, &account.password_hash)? {
            return Err(ApiError::InvalidCurrentPassword);
        }

        let hash = crate::password::hash(new_password)?;
        self.store.set_password_hash(&account.id, &hash).await?;
        self.store.clear_refresh_tokens(&account.id).await?;

        tracing::info!(account_id = %account.id, "password changed, all sessions revoked");
        Ok(())
    }

    /// Issue a single-use reset token with a fixed expiry, overwriting any
    /// outstanding one. Returns None for unknown emails; the caller's
    /// response must not reveal which case occurred.
    pub async fn forgot_password(&self, email: &str) -> ApiResult<Option<ResetIssued>> {
        let account = match self.store.get_account_by_email(email).await? {
            Some(account) => account,
            None => return Ok(None),
        };

        let token = random_token();
        self.store
            .set_reset_token(
                &account.id,
                &digest(&token),
                Utc::now() + Duration::minutes(self.reset_token_ttl_mins),
            )
            .await?;

        Ok(Some(ResetIssued {
            token,
            email: account.email,
            username: account.username,
        }))
    }

    /// Redeem a reset token. Expired and mismatched tokens are the same
    /// failure from outside.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> ApiResult<()> {
        let account = self
            .store
            .get_account_by_reset_digest(&digest(token))
            .await?
            .ok_or(ApiError::InvalidResetToken)?;

        let expires = account
            .password_reset_expires
            .ok_or(ApiError::InvalidResetToken)?;
        if expires < Utc::now() {
            return Err(ApiError::InvalidResetToken);
        }

        let hash = crate::password::hash(new_password)?;
        self.store.set_password_hash(&account.id, &hash).await?;
        self.store.clear_reset_token(&account.id).await?;
        self.store.clear_refresh_tokens(&account.id).await?;

        tracing::info!(account_id = %account.id, "password reset, all sessions revoked");
        Ok(())
    }

    /// Issue an email-verification token, overwriting any outstanding one
    pub async fn issue_email_verification(
        &self,
        account: &Account,
    ) -> ApiResult<VerificationIssued> {
        let token = random_token();
        self.store
            .set_verification_token(
                &account.id,
                &digest(&token),
                Utc::now() + Duration::hours(self.verification_token_ttl_hours),
            )
            .await?;

        Ok(VerificationIssued {
            token,
            email: account.email.clone(),
            username: account.username.clone(),
        })
    }

    /// Redeem an email-verification token
    pub async fn verify_email(&self, token: &str) -> ApiResult<()> {
        if !self.store.verify_email(&digest(token)).await? {
            return Err(ApiError::InvalidVerificationToken);
        }
        Ok(())
    }

    /// Update the pass-through profile fields
    pub async fn update_profile(&self, account_id: &str, patch: ProfilePatch) -> ApiResult<Account> {
        self.store.update_profile(account_id, patch).await?;
        self.store
            .get_account(account_id)
            .await?
            .ok_or(ApiError::UserNotFound)
    }

    /// Remove the account entirely after password re-confirmation. Every
    /// token for it becomes unauthorizable because no account loads.
    pub async fn delete_account(&self, account: &Account, password: &str) -> ApiResult<()> {
        if password.is_empty() {
            return Err(ApiError::PasswordRequired);
        }
        if !crate::password::verify(password, &account.password_hash)? {
            return Err(ApiError::InvalidPassword);
        }

        self.store.delete_account(&account.id).await?;
        tracing::info!(account_id = %account.id, "account deleted");
        Ok(())
    }

    /// Issue a token pair and add the refresh token to the live set
    async fn open_session(&self, account: &Account, remember: bool) -> ApiResult<TokenPair> {
        let access_token = self
            .tokens
            .issue_access_token(account)
            .map_err(|_| ApiError::Internal("Token signing failed".to_string()))?;
        let refresh_token = self
            .tokens
            .issue_refresh_token(account, remember)
            .map_err(|_| ApiError::Internal("Token signing failed".to_string()))?;

        self.store
            .add_refresh_token(
                &account.id,
                &refresh_token,
                self.tokens.refresh_expiry(remember),
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

/// 32 random bytes, hex-encoded
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 hex digest; only digests are stored server-side
fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
