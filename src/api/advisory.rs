/// Advisory endpoints: crop recommendation, disease detection, chat, weather
///
/// Every metered operation runs the full gate chain before touching the
/// upstream service, and records usage only after the upstream call
/// succeeds.
use crate::{
    auth::{self, Auth, OptionalAuth},
    context::AppContext,
    db::account::SubscriptionTier,
    error::{ApiError, ApiResult},
    quota::{UsageCategory, UsageSnapshot},
    response::ApiResponse,
    upstream::{ChatRequest, CropPrediction, DiseaseRequest, SoilSample},
};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

/// Build advisory routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/crops/recommend", post(recommend_crop))
        .route("/api/crops/detect-disease", post(detect_disease))
        .route("/api/chat", post(chat))
        .route("/api/weather", get(weather))
        .route("/api/usage", get(usage))
}

/// Crop recommendation: authenticated + metered
async fn recommend_crop(
    State(ctx): State<AppContext>,
    auth: Auth,
    Json(sample): Json<SoilSample>,
) -> ApiResult<Json<ApiResponse<CropPrediction>>> {
    sample.validate().map_err(ApiError::from)?;

    check_quota(&ctx, &auth, UsageCategory::CropRecommendations).await?;

    let prediction = ctx.advisory.recommend_crop(&sample).await?;
    ctx.quota
        .increment(&auth.account, UsageCategory::CropRecommendations)
        .await?;

    Ok(ApiResponse::new("Crop recommendation generated", prediction))
}

/// Disease detection: crop/mixed producers on basic tier or higher, metered
async fn detect_disease(
    State(ctx): State<AppContext>,
    auth: Auth,
    Json(req): Json<DiseaseRequest>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    req.validate().map_err(ApiError::from)?;

    auth::require_farmer_type(&auth.account, &["crop", "mixed"])?;
    auth::require_tier(&auth.account, SubscriptionTier::Basic)?;
    check_quota(&ctx, &auth, UsageCategory::ImageProcessing).await?;

    let report = ctx.advisory.detect_disease(&req).await?;
    ctx.quota
        .increment(&auth.account, UsageCategory::ImageProcessing)
        .await?;

    Ok(ApiResponse::new("Disease analysis complete", report))
}

/// Chat assistant: authenticated + verified email + metered
async fn chat(
    State(ctx): State<AppContext>,
    auth: Auth,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    req.validate().map_err(ApiError::from)?;

    check_quota(&ctx, &auth, UsageCategory::ChatMessages).await?;
    auth::require_verified_email(&auth.account)?;

    let completion = ctx.advisory.chat(&req).await?;
    ctx.quota
        .increment(&auth.account, UsageCategory::ChatMessages)
        .await?;

    Ok(ApiResponse::new("Assistant reply", completion))
}

#[derive(Debug, Deserialize)]
struct WeatherQuery {
    location: String,
}

/// Weather lookup: optional auth, unmetered. Authentication augments the
/// response with the caller's stored farm location fallback.
async fn weather(
    State(ctx): State<AppContext>,
    auth: OptionalAuth,
    query: Option<Query<WeatherQuery>>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    let location = query
        .map(|Query(q)| q.location)
        .or_else(|| {
            auth.0
                .as_ref()
                .and_then(|a| a.account.farm_location.clone())
        })
        .ok_or_else(|| ApiError::Validation("location is required".to_string()))?;

    let report = ctx.advisory.weather(&location).await?;
    Ok(ApiResponse::new("Weather retrieved", report))
}

/// Current-month usage snapshot for the caller
async fn usage(
    State(ctx): State<AppContext>,
    auth: Auth,
) -> ApiResult<Json<ApiResponse<UsageSnapshot>>> {
    let snapshot = ctx.quota.current_usage(&auth.account).await?;
    Ok(ApiResponse::new("Usage retrieved", snapshot))
}

async fn check_quota(ctx: &AppContext, auth: &Auth, category: UsageCategory) -> ApiResult<()> {
    let result = auth::ensure_within_quota(&ctx.quota, &auth.account, category).await;
    if matches!(result, Err(ApiError::ApiLimitExceeded(_))) {
        crate::metrics::record_quota_rejection(category.as_str());
    }
    result
}
