/// Application context and dependency injection
use crate::{
    account::CredentialStore,
    config::ServerConfig,
    db,
    error::ApiResult,
    mailer::Mailer,
    quota::QuotaTracker,
    rate_limit::RateLimiter,
    session::SessionManager,
    token::TokenService,
    upstream::AdvisoryClients,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub store: CredentialStore,
    pub tokens: TokenService,
    pub sessions: SessionManager,
    pub quota: QuotaTracker,
    pub advisory: AdvisoryClients,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Arc<Mailer>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.storage.account_db, db::DatabaseOptions::default())
            .await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let store = CredentialStore::new(pool.clone());
        let tokens = TokenService::new(&config.auth);
        let sessions = SessionManager::new(
            store.clone(),
            tokens.clone(),
            config.auth.reset_token_ttl_mins,
            config.auth.verification_token_ttl_hours,
        );
        let quota = QuotaTracker::new(pool.clone(), config.quota.clone());
        let advisory = AdvisoryClients::new(config.upstream.clone())?;
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let mailer = Arc::new(Mailer::new(config.email.clone())?);

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            store,
            tokens,
            sessions,
            quota,
            advisory,
            rate_limiter,
            mailer,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> ApiResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
