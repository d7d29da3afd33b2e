/// Rate Limiting System
use crate::config::RateLimitSettings;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

/// Global rate limiter with separate budgets for authenticated and
/// anonymous traffic
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    unauthenticated: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let auth_quota = Quota::per_second(
            NonZeroU32::new(settings.authenticated_rps).unwrap_or(NonZeroU32::new(100).unwrap()),
        )
        .allow_burst(NonZeroU32::new(settings.burst_size).unwrap_or(NonZeroU32::new(50).unwrap()));

        let unauth_quota = Quota::per_second(
            NonZeroU32::new(settings.unauthenticated_rps).unwrap_or(NonZeroU32::new(10).unwrap()),
        )
        .allow_burst(
            NonZeroU32::new(settings.burst_size / 5).unwrap_or(NonZeroU32::new(10).unwrap()),
        );

        Self {
            enabled: settings.enabled,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
        }
    }

    /// Check rate limit for authenticated traffic
    pub fn check_authenticated(&self) -> bool {
        !self.enabled || self.authenticated.check().is_ok()
    }

    /// Check rate limit for anonymous traffic
    pub fn check_unauthenticated(&self) -> bool {
        !self.enabled || self.unauthenticated.check().is_ok()
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let has_auth_header = request.headers().get("authorization").is_some();

    let allowed = if has_auth_header {
        ctx.rate_limiter.check_authenticated()
    } else {
        ctx.rate_limiter.check_unauthenticated()
    };

    if !allowed {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}
