/// End-to-end tests for the authentication and quota surface
///
/// Drives the real router over in-process HTTP: signup, signin, refresh
/// rotation, revocation, and the quota gate on a metered endpoint.
use agrigate::{
    config::{
        AuthConfig, LoggingConfig, QuotaConfig, RateLimitSettings, ServerConfig, ServiceConfig,
        StorageConfig, UpstreamConfig,
    },
    context::AppContext,
    quota::UsageCategory,
    server,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_context() -> (AppContext, Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let config = ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 0,
            version: "0.1.0".to_string(),
        },
        storage: StorageConfig {
            data_directory: dir.path().to_path_buf(),
            account_db: dir.path().join("accounts.sqlite"),
        },
        auth: AuthConfig {
            access_token_secret: "integration-access-secret-0123456789abcdef".to_string(),
            refresh_token_secret: "integration-refresh-secret-0123456789abcdef".to_string(),
            access_token_ttl_mins: 15,
            refresh_token_ttl_days: 7,
            remember_me_ttl_days: 30,
            reset_token_ttl_mins: 60,
            verification_token_ttl_hours: 24,
        },
        quota: QuotaConfig::default(),
        upstream: UpstreamConfig {
            prediction_url: "http://127.0.0.1:1".to_string(),
            disease_url: "http://127.0.0.1:1".to_string(),
            chat_url: "http://127.0.0.1:1".to_string(),
            chat_api_key: None,
            weather_url: "http://127.0.0.1:1".to_string(),
            weather_api_key: None,
            request_timeout_secs: 1,
        },
        email: None,
        rate_limit: RateLimitSettings {
            enabled: false,
            authenticated_rps: 100,
            unauthenticated_rps: 10,
            burst_size: 50,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    };

    let ctx = AppContext::new(config).await.unwrap();
    let router = server::build_router(ctx.clone());
    (ctx, router, dir)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(request: Request<Body>, token: &str) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    parts.headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token).parse().unwrap(),
    );
    Request::from_parts(parts, body)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn signup_body(email: &str, username: &str) -> Value {
    json!({
        "email": email,
        "username": username,
        "password": "integration-password",
        "fullName": "Flow Tester",
    })
}

async fn sign_up(router: &Router, email: &str, username: &str) -> Value {
    let response = router
        .clone()
        .oneshot(post_json("/auth/signup", signup_body(email, username)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn test_signup_envelope_and_cookies() {
    let (_ctx, router, _dir) = test_context().await;

    let response = router
        .clone()
        .oneshot(post_json("/auth/signup", signup_body("a@x.com", "a1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("accessToken=")
        && c.contains("HttpOnly")
        && c.contains("SameSite=Strict")));
    assert!(cookies.iter().any(|c| c.starts_with("refreshToken=")));

    let envelope = body_json(response).await;
    assert_eq!(envelope["success"], true);
    assert!(envelope["requestId"].is_string());
    assert!(envelope["timestamp"].is_string());
    assert_eq!(envelope["data"]["user"]["email"], "a@x.com");
    assert_eq!(envelope["data"]["user"]["subscriptionTier"], "free");
    assert!(envelope["data"]["user"].get("passwordHash").is_none());
    assert!(envelope["data"]["accessToken"].is_string());
    assert!(envelope["data"]["refreshToken"].is_string());
}

#[tokio::test]
async fn test_signup_conflict_is_409() {
    let (_ctx, router, _dir) = test_context().await;
    sign_up(&router, "a@x.com", "a1").await;

    let response = router
        .clone()
        .oneshot(post_json("/auth/signup", signup_body("a@x.com", "a2")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let envelope = body_json(response).await;
    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["errorCode"], "EMAIL_EXISTS");
}

#[tokio::test]
async fn test_signup_validation_error_lists_fields() {
    let (_ctx, router, _dir) = test_context().await;

    let response = router
        .clone()
        .oneshot(post_json(
            "/auth/signup",
            json!({
                "email": "not-an-email",
                "username": "ok_user",
                "password": "short",
                "fullName": "X",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "VALIDATION_ERROR");
    let fields: Vec<&str> = envelope["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
}

#[tokio::test]
async fn test_signin_failures_are_identical() {
    let (_ctx, router, _dir) = test_context().await;
    sign_up(&router, "a@x.com", "a1").await;

    let wrong_password = router
        .clone()
        .oneshot(post_json(
            "/auth/signin",
            json!({"email": "a@x.com", "password": "wrong"}),
        ))
        .await
        .unwrap();
    let unknown_email = router
        .clone()
        .oneshot(post_json(
            "/auth/signin",
            json!({"email": "ghost@x.com", "password": "whatever"}),
        ))
        .await
        .unwrap();

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);

    let a = body_json(wrong_password).await;
    let b = body_json(unknown_email).await;
    assert_eq!(a["errorCode"], b["errorCode"]);
    assert_eq!(a["error"], b["error"]);
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let (_ctx, router, _dir) = test_context().await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "NO_ACCESS_TOKEN");

    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("GET")
                .uri("/auth/profile")
                .body(Body::empty())
                .unwrap(),
            "garbage-token",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "INVALID_ACCESS_TOKEN");
}

#[tokio::test]
async fn test_profile_round_trip() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("PUT")
                .uri("/auth/profile")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"farmName": "Green Acres", "farmLocation": "Nairobi"}).to_string(),
                ))
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("GET")
                .uri("/auth/profile")
                .body(Body::empty())
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    let envelope = body_json(response).await;
    assert_eq!(envelope["data"]["farmName"], "Green Acres");
    assert_eq!(envelope["data"]["fullName"], "Flow Tester");
}

#[tokio::test]
async fn test_login_history_records_signins() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();

    router
        .clone()
        .oneshot(post_json(
            "/auth/signin",
            json!({"email": "a@x.com", "password": "integration-password"}),
        ))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("GET")
                .uri("/auth/login-history")
                .body(Body::empty())
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // One entry from signup, one from the later signin
    let envelope = body_json(response).await;
    assert_eq!(envelope["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_refresh_rotation_over_http() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let first_refresh = envelope["data"]["refreshToken"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(post_json(
            "/auth/refresh-token",
            json!({"refreshToken": first_refresh}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    let second_refresh = envelope["data"]["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(second_refresh, first_refresh);

    // The consumed token is dead
    let response = router
        .clone()
        .oneshot(post_json(
            "/auth/refresh-token",
            json!({"refreshToken": first_refresh}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "INVALID_REFRESH_TOKEN");

    // Missing token entirely
    let response = router
        .clone()
        .oneshot(post_json("/auth/refresh-token", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signout_all_revokes_refresh_tokens() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();
    let refresh = envelope["data"]["refreshToken"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(authed(
            post_json("/auth/signout-all", json!({})),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(post_json(
            "/auth/refresh-token",
            json!({"refreshToken": refresh}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_quota_gate_returns_429_before_upstream() {
    let (ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();

    let account = ctx
        .store
        .get_account_by_email("a@x.com")
        .await
        .unwrap()
        .unwrap();

    // Exhaust the free-tier crop ceiling
    for _ in 0..10 {
        ctx.quota
            .increment(&account, UsageCategory::CropRecommendations)
            .await
            .unwrap();
    }

    let response = router
        .clone()
        .oneshot(authed(
            post_json(
                "/api/crops/recommend",
                json!({
                    "N": 90.0, "P": 42.0, "K": 43.0,
                    "temperature": 20.8, "humidity": 82.0,
                    "ph": 6.5, "rainfall": 202.9
                }),
            ),
            &access,
        ))
        .await
        .unwrap();

    // The gate rejects without ever reaching the (unreachable) upstream
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "API_LIMIT_EXCEEDED");

    // The rejected call did not consume quota
    let snapshot = ctx.quota.current_usage(&account).await.unwrap();
    assert_eq!(snapshot.counters.crop_recommendations, 10);
}

#[tokio::test]
async fn test_usage_endpoint_reports_snapshot() {
    let (ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();

    let account = ctx
        .store
        .get_account_by_email("a@x.com")
        .await
        .unwrap()
        .unwrap();
    ctx.quota
        .increment(&account, UsageCategory::ChatMessages)
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("GET")
                .uri("/api/usage")
                .body(Body::empty())
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let envelope = body_json(response).await;
    assert_eq!(envelope["data"]["counters"]["chatMessages"], 1);
    assert_eq!(envelope["data"]["ceilings"]["chatMessages"], 50);
}

#[tokio::test]
async fn test_disease_endpoint_gated_by_tier() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();

    // Free tier is below the required basic tier
    let response = router
        .clone()
        .oneshot(authed(
            post_json("/api/crops/detect-disease", json!({"image": "aGVsbG8="})),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "INSUFFICIENT_SUBSCRIPTION");
}

#[tokio::test]
async fn test_chat_requires_verified_email() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(authed(
            post_json("/api/chat", json!({"message": "When should I plant maize?"})),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(response).await;
    assert_eq!(envelope["errorCode"], "EMAIL_VERIFICATION_REQUIRED");
}

#[tokio::test]
async fn test_delete_account_kills_all_tokens() {
    let (_ctx, router, _dir) = test_context().await;
    let envelope = sign_up(&router, "a@x.com", "a1").await;
    let access = envelope["data"]["accessToken"].as_str().unwrap().to_string();
    let refresh = envelope["data"]["refreshToken"].as_str().unwrap().to_string();

    // Wrong confirmation password
    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("DELETE")
                .uri("/auth/account")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"password": "wrong"}).to_string()))
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("DELETE")
                .uri("/auth/account")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"password": "integration-password"}).to_string(),
                ))
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The access token no longer loads an account
    let response = router
        .clone()
        .oneshot(authed(
            Request::builder()
                .method("GET")
                .uri("/auth/profile")
                .body(Body::empty())
                .unwrap(),
            &access,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // And the refresh token is unauthorizable
    let response = router
        .clone()
        .oneshot(post_json(
            "/auth/refresh-token",
            json!({"refreshToken": refresh}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_ctx, router, _dir) = test_context().await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}
