/// Authentication and account endpoints
use crate::{
    account::{
        ChangePasswordRequest, DeleteAccountRequest, ForgotPasswordRequest, ProfilePatch,
        PublicAccount, RefreshRequest, ResetPasswordRequest, SessionData, SigninRequest,
        SignupRequest, TokenPair, UpdateProfileRequest, VerifyEmailRequest,
    },
    auth::Auth,
    context::AppContext,
    error::{ApiError, ApiResult},
    response::ApiResponse,
};
use axum::{
    extract::State,
    routing::{delete, get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use validator::Validate;

/// Build authentication routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/signin", post(signin))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/profile", get(get_profile).put(update_profile))
        .route("/auth/login-history", get(login_history))
        .route("/auth/change-password", put(change_password))
        .route("/auth/signout", post(signout))
        .route("/auth/signout-all", post(signout_all))
        .route("/auth/account", delete(delete_account))
}

/// Create account endpoint
async fn signup(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(CookieJar, Json<ApiResponse<SessionData>>)> {
    req.validate().map_err(ApiError::from)?;

    let (account, pair) = ctx.sessions.sign_up(req).await?;

    // Verification email is best effort; the account already exists
    if ctx.mailer.is_configured() {
        match ctx.sessions.issue_email_verification(&account).await {
            Ok(issued) => {
                if let Err(e) = ctx
                    .mailer
                    .send_verification_email(
                        &issued.email,
                        &issued.username,
                        &issued.token,
                        &ctx.service_url(),
                    )
                    .await
                {
                    tracing::warn!("Failed to send verification email: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to issue verification token: {}", e),
        }
    }

    let jar = set_session_cookies(jar, &ctx, &pair, false);
    Ok((
        jar,
        ApiResponse::new(
            "Account created successfully",
            SessionData::new(account, &pair),
        ),
    ))
}

/// Sign-in endpoint
async fn signin(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Json(req): Json<SigninRequest>,
) -> ApiResult<(CookieJar, Json<ApiResponse<SessionData>>)> {
    req.validate().map_err(ApiError::from)?;

    let (account, pair) = ctx
        .sessions
        .sign_in(&req.email, &req.password, req.remember_me)
        .await?;

    let jar = set_session_cookies(jar, &ctx, &pair, req.remember_me);
    Ok((
        jar,
        ApiResponse::new("Signed in successfully", SessionData::new(account, &pair)),
    ))
}

/// Forgot-password endpoint. The response is identical whether or not the
/// email exists.
async fn forgot_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    req.validate().map_err(ApiError::from)?;

    if let Some(issued) = ctx.sessions.forgot_password(&req.email).await? {
        if let Err(e) = ctx
            .mailer
            .send_password_reset_email(
                &issued.email,
                &issued.username,
                &issued.token,
                &ctx.service_url(),
            )
            .await
        {
            tracing::warn!("Failed to send password reset email: {}", e);
        }
    }

    Ok(ApiResponse::new(
        "If an account exists for that email, a reset link has been sent",
        serde_json::json!({}),
    ))
}

/// Reset-password endpoint
async fn reset_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    req.validate().map_err(ApiError::from)?;

    ctx.sessions
        .reset_password(&req.token, &req.new_password)
        .await?;

    Ok(ApiResponse::new(
        "Password reset successfully. Please sign in again.",
        serde_json::json!({}),
    ))
}

/// Email verification endpoint
async fn verify_email(
    State(ctx): State<AppContext>,
    Json(req): Json<VerifyEmailRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    req.validate().map_err(ApiError::from)?;

    ctx.sessions.verify_email(&req.token).await?;

    Ok(ApiResponse::new(
        "Email verified successfully",
        serde_json::json!({}),
    ))
}

/// Refresh endpoint. The token may arrive in the body or as a cookie; this
/// is the only endpoint accepting it from the body.
async fn refresh_token(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<(CookieJar, Json<ApiResponse<SessionData>>)> {
    let presented = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| jar.get("refreshToken").map(|c| c.value().to_string()))
        .ok_or(ApiError::NoRefreshToken)?;

    let (account, pair) = ctx.sessions.refresh(&presented).await?;

    let jar = set_session_cookies(jar, &ctx, &pair, false);
    Ok((
        jar,
        ApiResponse::new("Session refreshed", SessionData::new(account, &pair)),
    ))
}

/// Profile read endpoint
async fn get_profile(auth: Auth) -> ApiResult<Json<ApiResponse<PublicAccount>>> {
    Ok(ApiResponse::new(
        "Profile retrieved",
        PublicAccount::from(auth.account),
    ))
}

/// Recent sign-in history for the caller
async fn login_history(
    State(ctx): State<AppContext>,
    auth: Auth,
) -> ApiResult<Json<ApiResponse<Vec<crate::db::account::LoginHistoryRow>>>> {
    let entries = ctx.store.login_history(&auth.account.id, 20).await?;
    Ok(ApiResponse::new("Login history retrieved", entries))
}

/// Profile update endpoint
async fn update_profile(
    State(ctx): State<AppContext>,
    auth: Auth,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ApiResponse<PublicAccount>>> {
    req.validate().map_err(ApiError::from)?;

    let account = ctx
        .sessions
        .update_profile(
            &auth.account.id,
            ProfilePatch {
                full_name: req.full_name,
                phone: req.phone,
                farmer_type: req.farmer_type,
                farm_name: req.farm_name,
                farm_location: req.farm_location,
                farm_size_hectares: req.farm_size_hectares,
            },
        )
        .await?;

    Ok(ApiResponse::new(
        "Profile updated",
        PublicAccount::from(account),
    ))
}

/// Change-password endpoint. Revokes every session even though this request
/// itself carried a valid access token.
async fn change_password(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    auth: Auth,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<(CookieJar, Json<ApiResponse<serde_json::Value>>)> {
    req.validate().map_err(ApiError::from)?;

    ctx.sessions
        .change_password(&auth.account, &req.current_password, &req.new_password)
        .await?;

    Ok((
        clear_session_cookies(jar),
        ApiResponse::new(
            "Password changed. Please sign in again on all devices.",
            serde_json::json!({}),
        ),
    ))
}

/// Sign out of the current device
async fn signout(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    auth: Auth,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<(CookieJar, Json<ApiResponse<serde_json::Value>>)> {
    let presented = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| jar.get("refreshToken").map(|c| c.value().to_string()));

    ctx.sessions
        .sign_out(&auth.account.id, presented.as_deref())
        .await?;

    Ok((
        clear_session_cookies(jar),
        ApiResponse::new("Signed out", serde_json::json!({})),
    ))
}

/// Sign out of every device
async fn signout_all(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    auth: Auth,
) -> ApiResult<(CookieJar, Json<ApiResponse<serde_json::Value>>)> {
    let revoked = ctx.sessions.sign_out_all(&auth.account.id).await?;

    Ok((
        clear_session_cookies(jar),
        ApiResponse::new(
            "Signed out of all devices",
            serde_json::json!({ "sessionsRevoked": revoked }),
        ),
    ))
}

/// Delete-account endpoint with password re-confirmation
async fn delete_account(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    auth: Auth,
    Json(req): Json<DeleteAccountRequest>,
) -> ApiResult<(CookieJar, Json<ApiResponse<serde_json::Value>>)> {
    ctx.sessions
        .delete_account(&auth.account, &req.password)
        .await?;

    Ok((
        clear_session_cookies(jar),
        ApiResponse::new("Account deleted", serde_json::json!({})),
    ))
}

/// Set HTTP-only strict cookies whose lifetimes match the signed expiries
fn set_session_cookies(
    jar: CookieJar,
    ctx: &AppContext,
    pair: &TokenPair,
    remember: bool,
) -> CookieJar {
    let access = Cookie::build(("accessToken", pair.access_token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::minutes(ctx.tokens.access_ttl_mins()))
        .build();

    let refresh = Cookie::build(("refreshToken", pair.refresh_token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::days(ctx.tokens.refresh_ttl_days(remember)))
        .build();

    jar.add(access).add(refresh)
}

fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(("accessToken", "")).path("/").build())
        .remove(Cookie::build(("refreshToken", "")).path("/").build())
}
