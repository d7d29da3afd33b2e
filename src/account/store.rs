/// Credential store backed by SQLite
///
/// The refresh-token set and usage counters are shared mutable state across
/// concurrent requests, so every mutation of them is a single conditional
/// statement (DELETE with a rows-affected check, UPSERT increment). Whole
/// records are never read, mutated in memory, and written back.
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::account::Account;
use crate::error::{ApiError, ApiResult};

const ACCOUNT_COLUMNS: &str = "id, email, username, password_hash, full_name, phone, farmer_type,
    farm_name, farm_location, farm_size_hectares, subscription_tier, subscription_expiry,
    email_verified, phone_verified, farmer_verified, email_verification_token,
    email_verification_expires, password_reset_token, password_reset_expires,
    active, created_at, last_login";

/// Fields for a new account row
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub farmer_type: String,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub farm_size_hectares: Option<f64>,
}

/// Profile fields that may be updated in place
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub farmer_type: Option<String>,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub farm_size_hectares: Option<f64>,
}

/// Durable per-account credential records
#[derive(Clone)]
pub struct CredentialStore {
    db: SqlitePool,
}

impl CredentialStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a new account. Unique-constraint races that slip past the
    /// caller's precheck map to the same conflict errors.
    pub async fn create_account(&self, new: NewAccount) -> ApiResult<Account> {
        let id = uuid::Uuid::new_v4().to_string();
        let email = new.email.to_lowercase();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO account (id, email, username, password_hash, full_name, phone,
                                  farmer_type, farm_name, farm_location, farm_size_hectares,
                                  created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&new.username)
        .bind(&new.password_hash)
        .bind(&new.full_name)
        .bind(&new.phone)
        .bind(&new.farmer_type)
        .bind(&new.farm_name)
        .bind(&new.farm_location)
        .bind(new.farm_size_hectares)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(map_unique_violation)?;

        self.get_account(&id)
            .await?
            .ok_or_else(|| ApiError::Internal("Account vanished after insert".to_string()))
    }

    /// Get account by id
    pub async fn get_account(&self, id: &str) -> ApiResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(account)
    }

    /// Get account by email, case-insensitively
    pub async fn get_account_by_email(&self, email: &str) -> ApiResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE email = ?1 COLLATE NOCASE",
            ACCOUNT_COLUMNS
        ))
        .bind(email.to_lowercase())
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(account)
    }

    pub async fn email_exists(&self, email: &str) -> ApiResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = ?1 COLLATE NOCASE")
                .bind(email.to_lowercase())
                .fetch_one(&self.db)
                .await
                .map_err(ApiError::Database)?;

        Ok(count > 0)
    }

    pub async fn username_exists(&self, username: &str) -> ApiResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE username = ?1")
            .bind(username)
            .fetch_one(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(count > 0)
    }

    // ==================== Refresh token set ====================

    /// Add a refresh token to the account's live set
    pub async fn add_refresh_token(
        &self,
        account_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO refresh_token (token, account_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token)
        .bind(account_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Atomically rotate a refresh token: the presented token is consumed
    /// and the replacement inserted in one transaction. Returns false when
    /// the presented token was not in the live set (revoked, rotated, or
    /// never issued) -- in that case nothing is inserted.
    pub async fn rotate_refresh_token(
        &self,
        account_id: &str,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<bool> {
        let mut tx = self.db.begin().await.map_err(ApiError::Database)?;

        let consumed =
            sqlx::query("DELETE FROM refresh_token WHERE token = ?1 AND account_id = ?2")
                .bind(old_token)
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::Database)?
                .rows_affected();

        if consumed == 0 {
            tx.rollback().await.map_err(ApiError::Database)?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_token (token, account_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(new_token)
        .bind(account_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::Database)?;

        tx.commit().await.map_err(ApiError::Database)?;
        Ok(true)
    }

    /// Remove one refresh token. Idempotent: removing an absent token is
    /// not an error.
    pub async fn remove_refresh_token(&self, account_id: &str, token: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM refresh_token WHERE token = ?1 AND account_id = ?2")
            .bind(token)
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Clear the entire refresh-token set, invalidating every session
    pub async fn clear_refresh_tokens(&self, account_id: &str) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE account_id = ?1")
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(result.rows_affected())
    }

    pub async fn refresh_token_count(&self, account_id: &str) -> ApiResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM refresh_token WHERE account_id = ?1")
                .bind(account_id)
                .fetch_one(&self.db)
                .await
                .map_err(ApiError::Database)?;

        Ok(count)
    }

    // ==================== Credentials ====================

    pub async fn set_password_hash(&self, account_id: &str, hash: &str) -> ApiResult<()> {
        sqlx::query("UPDATE account SET password_hash = ?1 WHERE id = ?2")
            .bind(hash)
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Store the reset-token digest, overwriting any outstanding value
    pub async fn set_reset_token(
        &self,
        account_id: &str,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE account SET password_reset_token = ?1, password_reset_expires = ?2
             WHERE id = ?3",
        )
        .bind(digest)
        .bind(expires_at)
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }

    pub async fn get_account_by_reset_digest(&self, digest: &str) -> ApiResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE password_reset_token = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(digest)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(account)
    }

    pub async fn clear_reset_token(&self, account_id: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE account SET password_reset_token = NULL, password_reset_expires = NULL
             WHERE id = ?1",
        )
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Store the email-verification digest, overwriting any outstanding value
    pub async fn set_verification_token(
        &self,
        account_id: &str,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE account SET email_verification_token = ?1, email_verification_expires = ?2
             WHERE id = ?3",
        )
        .bind(digest)
        .bind(expires_at)
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Mark the email verified when the digest matches and is unexpired.
    /// Single conditional update; returns whether a row was flipped.
    pub async fn verify_email(&self, digest: &str) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE account SET email_verified = 1, email_verification_token = NULL,
                    email_verification_expires = NULL
             WHERE email_verification_token = ?1 AND email_verification_expires > ?2",
        )
        .bind(digest)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Profile & lifecycle ====================

    pub async fn update_profile(&self, account_id: &str, patch: ProfilePatch) -> ApiResult<()> {
        sqlx::query(
            "UPDATE account SET
                 full_name = COALESCE(?1, full_name),
                 phone = COALESCE(?2, phone),
                 farmer_type = COALESCE(?3, farmer_type),
                 farm_name = COALESCE(?4, farm_name),
                 farm_location = COALESCE(?5, farm_location),
                 farm_size_hectares = COALESCE(?6, farm_size_hectares)
             WHERE id = ?7",
        )
        .bind(&patch.full_name)
        .bind(&patch.phone)
        .bind(&patch.farmer_type)
        .bind(&patch.farm_name)
        .bind(&patch.farm_location)
        .bind(patch.farm_size_hectares)
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }

    pub async fn touch_last_login(&self, account_id: &str) -> ApiResult<()> {
        sqlx::query("UPDATE account SET last_login = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }

    pub async fn record_login(
        &self,
        account_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO login_history (account_id, logged_in_at, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(account_id)
        .bind(Utc::now())
        .bind(ip_address)
        .bind(user_agent)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Most recent sign-ins, newest first
    pub async fn login_history(
        &self,
        account_id: &str,
        limit: i64,
    ) -> ApiResult<Vec<crate::db::account::LoginHistoryRow>> {
        let rows = sqlx::query_as::<_, crate::db::account::LoginHistoryRow>(
            "SELECT id, account_id, logged_in_at, ip_address, user_agent
             FROM login_history WHERE account_id = ?1
             ORDER BY logged_in_at DESC, id DESC LIMIT ?2",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(rows)
    }

    /// Hard-delete the account. Refresh tokens, usage records, and login
    /// history go with it via ON DELETE CASCADE.
    pub async fn delete_account(&self, account_id: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM account WHERE id = ?1")
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Purge expired refresh tokens and lapsed reset/verification tokens.
    /// Returns (refresh_tokens_deleted, reset_tokens_cleared).
    pub async fn cleanup_expired(&self) -> ApiResult<(u64, u64)> {
        let now = Utc::now();

        let refresh_result = sqlx::query("DELETE FROM refresh_token WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        let reset_result = sqlx::query(
            "UPDATE account SET password_reset_token = NULL, password_reset_expires = NULL
             WHERE password_reset_expires IS NOT NULL AND password_reset_expires < ?1",
        )
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok((
            refresh_result.rows_affected(),
            reset_result.rows_affected(),
        ))
    }
}

/// Map a UNIQUE violation on email/username to the matching conflict error
fn map_unique_violation(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(ref db_err) = e {
        let message = db_err.message();
        if message.contains("account.email") {
            return ApiError::EmailExists;
        }
        if message.contains("account.username") {
            return ApiError::UsernameExists;
        }
    }
    ApiError::Database(e)
}
