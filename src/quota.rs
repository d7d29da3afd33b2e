/// Monthly usage-quota accounting
///
/// Each account accrues per-category counters under a calendar-month key
/// (`YYYY-MM`). Ceilings come from the subscription tier in effect at the
/// first use of the month and are frozen into the row at creation. The
/// increment is a single UPSERT keyed by (account, month), so concurrent
/// requests can never lose updates. Reads are side-effect free; a row
/// materializes only on increment.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::QuotaConfig;
use crate::db::account::{Account, SubscriptionTier, UsageRow};
use crate::error::{ApiError, ApiResult};

/// Metered API categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageCategory {
    CropRecommendations,
    ImageProcessing,
    ChatMessages,
}

impl UsageCategory {
    /// Client-facing category name, as used in envelopes and counters
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageCategory::CropRecommendations => "cropRecommendations",
            UsageCategory::ImageProcessing => "imageProcessing",
            UsageCategory::ChatMessages => "chatMessages",
        }
    }
}

/// Per-category ceilings for one tier. Negative means unmetered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCeilings {
    pub crop_recommendations: i64,
    pub image_processing: i64,
    pub chat_messages: i64,
}

impl CategoryCeilings {
    fn get(&self, category: UsageCategory) -> i64 {
        match category {
            UsageCategory::CropRecommendations => self.crop_recommendations,
            UsageCategory::ImageProcessing => self.image_processing,
            UsageCategory::ChatMessages => self.chat_messages,
        }
    }
}

/// Per-category counters for one month
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounters {
    pub crop_recommendations: i64,
    pub image_processing: i64,
    pub chat_messages: i64,
}

impl CategoryCounters {
    fn get(&self, category: UsageCategory) -> i64 {
        match category {
            UsageCategory::CropRecommendations => self.crop_recommendations,
            UsageCategory::ImageProcessing => self.image_processing,
            UsageCategory::ChatMessages => self.chat_messages,
        }
    }
}

/// Point-in-time view of an account's usage for one month
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub month: String,
    pub counters: CategoryCounters,
    pub ceilings: CategoryCeilings,
}

/// Tracks and enforces monthly per-category usage ceilings
#[derive(Clone)]
pub struct QuotaTracker {
    db: SqlitePool,
    config: QuotaConfig,
}

impl QuotaTracker {
    pub fn new(db: SqlitePool, config: QuotaConfig) -> Self {
        Self { db, config }
    }

    /// Calendar-month key for an instant, e.g. "2026-08"
    pub fn month_key(at: DateTime<Utc>) -> String {
        at.format("%Y-%m").to_string()
    }

    /// Ceilings for a tier from the configured table
    pub fn ceilings_for(&self, tier: SubscriptionTier) -> CategoryCeilings {
        match tier {
            SubscriptionTier::Free => self.config.free,
            SubscriptionTier::Basic => self.config.basic,
            SubscriptionTier::Premium => self.config.premium,
            SubscriptionTier::Enterprise => self.config.enterprise,
        }
    }

    /// Current-month usage for the account. Returns a zeroed snapshot with
    /// tier-derived ceilings when no record exists yet.
    pub async fn current_usage(&self, account: &Account) -> ApiResult<UsageSnapshot> {
        self.usage_for_month(account, &Self::month_key(Utc::now()))
            .await
    }

    /// True when the account's counter has reached the ceiling for the
    /// category this month
    pub async fn has_exceeded(
        &self,
        account: &Account,
        category: UsageCategory,
    ) -> ApiResult<bool> {
        let snapshot = self.current_usage(account).await?;
        let ceiling = snapshot.ceilings.get(category);
        if ceiling < 0 {
            return Ok(false);
        }
        Ok(snapshot.counters.get(category) >= ceiling)
    }

    /// Record one use of the category for the current month
    pub async fn increment(&self, account: &Account, category: UsageCategory) -> ApiResult<()> {
        self.increment_for_month(account, category, &Self::month_key(Utc::now()))
            .await
    }

    async fn usage_for_month(&self, account: &Account, month: &str) -> ApiResult<UsageSnapshot> {
        let row = sqlx::query_as::<_, UsageRow>(
            "SELECT account_id, month, crop_recommendations, image_processing, chat_messages,
                    crop_ceiling, image_ceiling, chat_ceiling, created_at
             FROM usage_record WHERE account_id = ?1 AND month = ?2",
        )
        .bind(&account.id)
        .bind(month)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(match row {
            Some(row) => UsageSnapshot {
                month: row.month,
                counters: CategoryCounters {
                    crop_recommendations: row.crop_recommendations,
                    image_processing: row.image_processing,
                    chat_messages: row.chat_messages,
                },
                ceilings: CategoryCeilings {
                    crop_recommendations: row.crop_ceiling,
                    image_processing: row.image_ceiling,
                    chat_messages: row.chat_ceiling,
                },
            },
            None => UsageSnapshot {
                month: month.to_string(),
                counters: CategoryCounters::default(),
                ceilings: self.ceilings_for(account.subscription_tier),
            },
        })
    }

    /// Single-statement conditional increment. Seeds the month row on first
    /// use with ceilings frozen from the account's tier; otherwise bumps the
    /// matching counter in place. The ceilings are untouched on conflict.
    async fn increment_for_month(
        &self,
        account: &Account,
        category: UsageCategory,
        month: &str,
    ) -> ApiResult<()> {
        let ceilings = self.ceilings_for(account.subscription_tier);
        let (crop, image, chat) = match category {
            UsageCategory::CropRecommendations => (1i64, 0i64, 0i64),
            UsageCategory::ImageProcessing => (0, 1, 0),
            UsageCategory::ChatMessages => (0, 0, 1),
        };

        sqlx::query(
            "INSERT INTO usage_record
                 (account_id, month, crop_recommendations, image_processing, chat_messages,
                  crop_ceiling, image_ceiling, chat_ceiling, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(account_id, month) DO UPDATE SET
                 crop_recommendations = crop_recommendations + excluded.crop_recommendations,
                 image_processing = image_processing + excluded.image_processing,
                 chat_messages = chat_messages + excluded.chat_messages",
        )
        .bind(&account.id)
        .bind(month)
        .bind(crop)
        .bind(image)
        .bind(chat)
        .bind(ceilings.crop_recommendations)
        .bind(ceilings.image_processing)
        .bind(ceilings.chat_messages)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (QuotaTracker, Account) {
        // A single connection keeps every query on the same in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let account = insert_account(&pool, "quota@example.com", "quotauser", SubscriptionTier::Free)
            .await;

        (QuotaTracker::new(pool, QuotaConfig::default()), account)
    }

    async fn insert_account(
        pool: &SqlitePool,
        email: &str,
        username: &str,
        tier: SubscriptionTier,
    ) -> Account {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO account (id, email, username, password_hash, full_name,
                                  subscription_tier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(email)
        .bind(username)
        .bind("hash")
        .bind("Quota Tester")
        .bind(tier)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();

        sqlx::query_as::<_, Account>("SELECT * FROM account WHERE id = ?1")
            .bind(&id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_month_key_format() {
        let at = DateTime::parse_from_rfc3339("2026-08-06T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(QuotaTracker::month_key(at), "2026-08");
    }

    #[tokio::test]
    async fn test_read_has_no_side_effect() {
        let (tracker, account) = setup().await;

        let snapshot = tracker.current_usage(&account).await.unwrap();
        assert_eq!(snapshot.counters.crop_recommendations, 0);
        assert_eq!(snapshot.ceilings.crop_recommendations, 10);

        // The read must not have materialized a row
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_record")
            .fetch_one(&tracker.db)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_increment_seeds_then_bumps() {
        let (tracker, account) = setup().await;

        tracker
            .increment(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap();
        let snapshot = tracker.current_usage(&account).await.unwrap();
        assert_eq!(snapshot.counters.crop_recommendations, 1);
        assert_eq!(snapshot.counters.image_processing, 0);
        assert_eq!(snapshot.counters.chat_messages, 0);

        tracker
            .increment(&account, UsageCategory::ChatMessages)
            .await
            .unwrap();
        let snapshot = tracker.current_usage(&account).await.unwrap();
        assert_eq!(snapshot.counters.crop_recommendations, 1);
        assert_eq!(snapshot.counters.chat_messages, 1);
    }

    #[tokio::test]
    async fn test_free_tier_crop_ceiling_scenario() {
        let (tracker, account) = setup().await;

        for _ in 0..9 {
            tracker
                .increment(&account, UsageCategory::CropRecommendations)
                .await
                .unwrap();
            assert!(!tracker
                .has_exceeded(&account, UsageCategory::CropRecommendations)
                .await
                .unwrap());
        }

        tracker
            .increment(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap();
        assert!(tracker
            .has_exceeded(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap());

        // Later calls stay exceeded
        tracker
            .increment(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap();
        assert!(tracker
            .has_exceeded(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap());

        // Other categories are unaffected
        assert!(!tracker
            .has_exceeded(&account, UsageCategory::ChatMessages)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_enterprise_is_unmetered() {
        let (tracker, _) = setup().await;
        let account = insert_account(
            &tracker.db,
            "big@example.com",
            "bigfarm",
            SubscriptionTier::Enterprise,
        )
        .await;

        for _ in 0..200 {
            tracker
                .increment(&account, UsageCategory::ImageProcessing)
                .await
                .unwrap();
        }
        assert!(!tracker
            .has_exceeded(&account, UsageCategory::ImageProcessing)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_month_rollover_resets_without_mutating_history() {
        let (tracker, account) = setup().await;

        for _ in 0..10 {
            tracker
                .increment_for_month(&account, UsageCategory::CropRecommendations, "2026-07")
                .await
                .unwrap();
        }
        let july = tracker.usage_for_month(&account, "2026-07").await.unwrap();
        assert_eq!(july.counters.crop_recommendations, 10);

        // A new month starts from zero
        let august = tracker.usage_for_month(&account, "2026-08").await.unwrap();
        assert_eq!(august.counters.crop_recommendations, 0);

        tracker
            .increment_for_month(&account, UsageCategory::CropRecommendations, "2026-08")
            .await
            .unwrap();

        // The prior month's record is untouched
        let july = tracker.usage_for_month(&account, "2026-07").await.unwrap();
        assert_eq!(july.counters.crop_recommendations, 10);
    }

    #[tokio::test]
    async fn test_ceilings_frozen_at_first_use() {
        let (tracker, account) = setup().await;

        tracker
            .increment(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap();

        // Tier upgrade mid-month does not rewrite the stored ceilings
        sqlx::query("UPDATE account SET subscription_tier = 'premium' WHERE id = ?1")
            .bind(&account.id)
            .execute(&tracker.db)
            .await
            .unwrap();
        let upgraded = sqlx::query_as::<_, Account>("SELECT * FROM account WHERE id = ?1")
            .bind(&account.id)
            .fetch_one(&tracker.db)
            .await
            .unwrap();

        tracker
            .increment(&upgraded, UsageCategory::CropRecommendations)
            .await
            .unwrap();

        let snapshot = tracker.current_usage(&upgraded).await.unwrap();
        assert_eq!(snapshot.counters.crop_recommendations, 2);
        assert_eq!(snapshot.ceilings.crop_recommendations, 10);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        // File-backed pool so concurrent tasks share one database
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::create_pool(
            &dir.path().join("quota.sqlite"),
            crate::db::DatabaseOptions::default(),
        )
        .await
        .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let account = insert_account(
            &pool,
            "racer@example.com",
            "racer",
            SubscriptionTier::Premium,
        )
        .await;
        let tracker = QuotaTracker::new(pool, QuotaConfig::default());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let tracker = tracker.clone();
            let account = account.clone();
            handles.push(tokio::spawn(async move {
                tracker
                    .increment(&account, UsageCategory::ChatMessages)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = tracker.current_usage(&account).await.unwrap();
        assert_eq!(snapshot.counters.chat_messages, 20);
    }
}
