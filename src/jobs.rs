/// Background maintenance jobs
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::context::AppContext;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_token_cleanup_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Purge expired refresh tokens and lapsed reset tokens (runs hourly)
    async fn expired_token_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;

            match scheduler.context.store.cleanup_expired().await {
                Ok((refresh_tokens, reset_tokens)) => {
                    if refresh_tokens > 0 || reset_tokens > 0 {
                        info!(
                            refresh_tokens,
                            reset_tokens, "Cleaned up expired credential tokens"
                        );
                    }
                }
                Err(e) => error!("Failed to clean up expired tokens: {}", e),
            }
        }
    }
}
