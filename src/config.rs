/// Configuration management for the Agrigate service
use crate::error::{ApiError, ApiResult};
use crate::quota::CategoryCeilings;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub quota: QuotaConfig,
    pub upstream: UpstreamConfig,
    pub email: Option<EmailConfig>,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
}

/// Authentication configuration
///
/// Access and refresh tokens are signed with distinct secrets so one kind
/// can never verify as the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_ttl_mins: i64,
    pub refresh_token_ttl_days: i64,
    /// "Remember me" refresh lifetime. Extends the signed expiry, not just
    /// the cookie.
    pub remember_me_ttl_days: i64,
    pub reset_token_ttl_mins: i64,
    pub verification_token_ttl_hours: i64,
}

/// Per-tier monthly quota ceilings. A negative ceiling means unmetered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub free: CategoryCeilings,
    pub basic: CategoryCeilings,
    pub premium: CategoryCeilings,
    pub enterprise: CategoryCeilings,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: CategoryCeilings {
                crop_recommendations: 10,
                image_processing: 5,
                chat_messages: 50,
            },
            basic: CategoryCeilings {
                crop_recommendations: 50,
                image_processing: 25,
                chat_messages: 200,
            },
            premium: CategoryCeilings {
                crop_recommendations: 200,
                image_processing: 100,
                chat_messages: 1000,
            },
            enterprise: CategoryCeilings {
                crop_recommendations: -1,
                image_processing: -1,
                chat_messages: -1,
            },
        }
    }
}

/// Upstream advisory services consumed over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub prediction_url: String,
    pub disease_url: String,
    pub chat_url: String,
    pub chat_api_key: Option<String>,
    pub weather_url: String,
    pub weather_api_key: Option<String>,
    pub request_timeout_secs: u64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("AGRIGATE_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("AGRIGATE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ApiError::Validation("Invalid port number".to_string()))?;
        let version = env::var("AGRIGATE_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("AGRIGATE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let account_db = env::var("AGRIGATE_ACCOUNT_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("accounts.sqlite"));

        let access_token_secret = env::var("AGRIGATE_ACCESS_TOKEN_SECRET")
            .map_err(|_| ApiError::Validation("Access token secret required".to_string()))?;
        let refresh_token_secret = env::var("AGRIGATE_REFRESH_TOKEN_SECRET")
            .map_err(|_| ApiError::Validation("Refresh token secret required".to_string()))?;

        let access_token_ttl_mins = int_env("AGRIGATE_ACCESS_TOKEN_TTL_MINS", 15);
        let refresh_token_ttl_days = int_env("AGRIGATE_REFRESH_TOKEN_TTL_DAYS", 7);
        let remember_me_ttl_days = int_env("AGRIGATE_REMEMBER_ME_TTL_DAYS", 30);
        let reset_token_ttl_mins = int_env("AGRIGATE_RESET_TOKEN_TTL_MINS", 60);
        let verification_token_ttl_hours = int_env("AGRIGATE_VERIFICATION_TOKEN_TTL_HOURS", 24);

        let quota_defaults = QuotaConfig::default();
        let quota = QuotaConfig {
            free: ceilings_env("FREE", &quota_defaults.free),
            basic: ceilings_env("BASIC", &quota_defaults.basic),
            premium: ceilings_env("PREMIUM", &quota_defaults.premium),
            enterprise: ceilings_env("ENTERPRISE", &quota_defaults.enterprise),
        };

        let prediction_url = env::var("AGRIGATE_PREDICTION_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let disease_url = env::var("AGRIGATE_DISEASE_URL")
            .unwrap_or_else(|_| "http://localhost:8001".to_string());
        let chat_url = env::var("AGRIGATE_CHAT_URL")
            .unwrap_or_else(|_| "http://localhost:8002".to_string());
        let chat_api_key = env::var("AGRIGATE_CHAT_API_KEY").ok();
        let weather_url = env::var("AGRIGATE_WEATHER_URL")
            .unwrap_or_else(|_| "https://api.openweathermap.org/data/2.5/weather".to_string());
        let weather_api_key = env::var("AGRIGATE_WEATHER_API_KEY").ok();
        let request_timeout_secs = env::var("AGRIGATE_UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let email = if let Ok(smtp_url) = env::var("AGRIGATE_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("AGRIGATE_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let rate_limit_enabled = env::var("AGRIGATE_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let authenticated_rps = env::var("AGRIGATE_RATE_LIMIT_AUTHENTICATED_RPS")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);
        let unauthenticated_rps = env::var("AGRIGATE_RATE_LIMIT_UNAUTHENTICATED_RPS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let burst_size = env::var("AGRIGATE_RATE_LIMIT_BURST_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
            },
            auth: AuthConfig {
                access_token_secret,
                refresh_token_secret,
                access_token_ttl_mins,
                refresh_token_ttl_days,
                remember_me_ttl_days,
                reset_token_ttl_mins,
                verification_token_ttl_hours,
            },
            quota,
            upstream: UpstreamConfig {
                prediction_url,
                disease_url,
                chat_url,
                chat_api_key,
                weather_url,
                weather_api_key,
                request_timeout_secs,
            },
            email,
            rate_limit: RateLimitSettings {
                enabled: rate_limit_enabled,
                authenticated_rps,
                unauthenticated_rps,
                burst_size,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ApiError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.auth.access_token_secret.len() < 32 {
            return Err(ApiError::Validation(
                "Access token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.auth.refresh_token_secret.len() < 32 {
            return Err(ApiError::Validation(
                "Refresh token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.auth.access_token_secret == self.auth.refresh_token_secret {
            return Err(ApiError::Validation(
                "Access and refresh token secrets must differ".to_string(),
            ));
        }

        if self.auth.access_token_ttl_mins <= 0 || self.auth.refresh_token_ttl_days <= 0 {
            return Err(ApiError::Validation(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn int_env(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn ceilings_env(tier: &str, defaults: &CategoryCeilings) -> CategoryCeilings {
    CategoryCeilings {
        crop_recommendations: int_env(
            &format!("AGRIGATE_QUOTA_{}_CROP", tier),
            defaults.crop_recommendations,
        ),
        image_processing: int_env(
            &format!("AGRIGATE_QUOTA_{}_IMAGE", tier),
            defaults.image_processing,
        ),
        chat_messages: int_env(
            &format!("AGRIGATE_QUOTA_{}_CHAT", tier),
            defaults.chat_messages,
        ),
    }
}
