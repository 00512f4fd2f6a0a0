//! API Integration Tests
//!
//! Drive the full router over an in-memory user store and a static identity
//! provider.

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jetswitch_api::{create_router, create_router_for_testing, create_test_state, TEST_PROVIDER_CODE};
use reqwest::Url;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn authorized_request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let mut request = create_json_request(method, uri, body);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn registration(username: &str, email: &str) -> Value {
    json!({
        "username": username,
        "email": email,
        "password": "p1",
        "confirm_password": "p1",
        "user_type": "listener"
    })
}

async fn register(app: &Router, username: &str, email: &str) -> Response<Body> {
    app.clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/register",
            Some(registration(username, email)),
        ))
        .await
        .unwrap()
}

/// Google sign-in started by one browser
struct GoogleLogin {
    state: String,
    /// `Cookie` header value the browser sends back
    cookie: String,
}

/// Start a Google sign-in and return the state and cookie it carries
async fn begin_google_login(app: &Router) -> GoogleLogin {
    let response = app
        .clone()
        .oneshot(create_json_request("GET", "/api/auth/google", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let url = Url::parse(&location(&response)).unwrap();
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    GoogleLogin { state, cookie }
}

async fn google_callback(
    app: &Router,
    code: &str,
    state: &str,
    cookie: Option<&str>,
) -> Response<Body> {
    let uri = format!("/api/auth/google/callback?code={code}&state={state}");
    let mut request = create_json_request("GET", &uri, None);
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
    }
    app.clone().oneshot(request).await.unwrap()
}

async fn complete_google_login(app: &Router) -> Response<Body> {
    let login = begin_google_login(app).await;
    google_callback(app, TEST_PROVIDER_CODE, &login.state, Some(&login.cookie)).await
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request("GET", "/api-docs/openapi.json", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/api/auth/register"].is_object());
    assert!(json["paths"]["/api/auth/google/callback"].is_object());
}

// =============================================================================
// Registration and Login Tests
// =============================================================================

#[tokio::test]
async fn test_register_success() {
    let app = create_router_for_testing();

    let response = register(&app, "alice", "alice@x.com").await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert!(!json["token"].as_str().unwrap().is_empty());
    assert_eq!(json["user"]["username"], "alice");
    assert_eq!(json["user"]["user_type"], "listener");
    assert_eq!(json["user"]["auth_provider"], "local");
    assert!(json["user"].get("credential_secret").is_none());
    assert!(json["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_register_duplicate_username() {
    let app = create_router_for_testing();

    assert_eq!(
        register(&app, "alice", "alice@x.com").await.status(),
        StatusCode::CREATED
    );

    let response = register(&app, "alice", "other@x.com").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["code"], "CONFLICT");
    assert_eq!(json["message"], "username already taken");
}

#[tokio::test]
async fn test_register_validation_errors() {
    let app = create_router_for_testing();

    let cases = vec![
        (json!({"username": "", "email": "a@x.com", "password": "p1", "confirm_password": "p1", "user_type": "listener"}), "all fields are required"),
        (json!({"username": "a", "email": "ax.com", "password": "p1", "confirm_password": "p1", "user_type": "listener"}), "invalid email format"),
        (json!({"username": "a", "email": "a@x.com", "password": "p1", "confirm_password": "p2", "user_type": "listener"}), "passwords do not match"),
        (json!({"username": "a", "email": "a@x.com", "password": "p1", "confirm_password": "p1", "user_type": "dj"}), "invalid user type"),
    ];

    for (body, expected) in cases {
        let response = app
            .clone()
            .oneshot(create_json_request("POST", "/api/auth/register", Some(body)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["message"], expected);
    }
}

#[tokio::test]
async fn test_concurrent_registration_single_winner() {
    let app = create_router_for_testing();

    let attempts = (0..4).map(|i| {
        let app = app.clone();
        async move { register(&app, "alice", &format!("alice{i}@x.com")).await.status() }
    });
    let statuses = futures::future::join_all(attempts).await;

    let created = statuses
        .iter()
        .filter(|s| **s == StatusCode::CREATED)
        .count();
    let conflicts = statuses
        .iter()
        .filter(|s| **s == StatusCode::CONFLICT)
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 3);
}

#[tokio::test]
async fn test_login() {
    let app = create_router_for_testing();
    register(&app, "alice", "alice@x.com").await;

    let response = app
        .clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/login",
            Some(json!({"username": "alice", "password": "p1"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["token"].is_string());
    assert_eq!(json["user"]["username"], "alice");

    for body in [
        json!({"username": "alice", "password": "wrong"}),
        json!({"username": "nobody", "password": "p1"}),
    ] {
        let response = app
            .clone()
            .oneshot(create_json_request("POST", "/api/auth/login", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["message"], "invalid username or password");
    }
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
async fn test_me_requires_session() {
    let state = create_test_state();
    let app = create_router(state.clone());

    let response = register(&app, "alice", "alice@x.com").await;
    let token = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(authorized_request("GET", "/api/auth/me", &token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["username"], "alice");

    let response = app
        .clone()
        .oneshot(create_json_request("GET", "/api/auth/me", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["message"], "Authentication required");
}

#[tokio::test]
async fn test_expired_token_rejected_generically() {
    let state = create_test_state();
    let app = create_router(state.clone());
    register(&app, "alice", "alice@x.com").await;

    let expired = state
        .tokens
        .issue_at(1, "alice", Utc::now() - Duration::days(8))
        .unwrap();

    let response = app
        .clone()
        .oneshot(authorized_request("GET", "/api/auth/me", &expired, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
    assert_eq!(json["message"], "Authentication required");
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let app = create_router_for_testing();

    for value in ["Basic abc", "Bearer", "bearer abc", "Bearer a b"] {
        let mut request = create_json_request("GET", "/api/auth/me", None);
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, value.parse().unwrap());

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{value:?}");
    }
}

#[tokio::test]
async fn test_update_user_type() {
    let app = create_router_for_testing();
    let token = body_json(register(&app, "alice", "alice@x.com").await).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(authorized_request(
            "POST",
            "/api/auth/update-user-type",
            &token,
            Some(json!({"user_type": "dj"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["message"], "invalid user type");

    let response = app
        .clone()
        .oneshot(authorized_request(
            "POST",
            "/api/auth/update-user-type",
            &token,
            Some(json!({"user_type": "artist"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["user"]["user_type"], "artist");
    assert_eq!(json["message"], "User type updated successfully");

    let response = app
        .clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/update-user-type",
            Some(json!({"user_type": "artist"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_for_missing_user_is_not_found() {
    let state = create_test_state();
    let app = create_router(state.clone());
    let token = state.tokens.issue(4242, "ghost").unwrap();

    let response = app
        .oneshot(authorized_request("GET", "/api/auth/me", &token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Google Sign-in Tests
// =============================================================================

#[tokio::test]
async fn test_google_login_redirects_to_consent_screen() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request("GET", "/api/auth/google", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let url = Url::parse(&location(&response)).unwrap();
    let state = url.query_pairs().find(|(k, _)| k == "state").unwrap().1;
    assert!(!state.is_empty());

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with(&format!("jetswitch_oauth_state={state};")));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
}

#[tokio::test]
async fn test_google_callback_new_then_returning_user() {
    let state = create_test_state();
    let app = create_router(state.clone());

    let response = complete_google_login(&app).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cleared.contains("Max-Age=0"));

    let first = location(&response);
    assert!(
        first.starts_with("http://localhost:5173/select-user-type?token="),
        "{first}"
    );

    let token = first.split("token=").nth(1).unwrap();
    let claims = state.tokens.validate(token).unwrap();
    assert_eq!(claims.username, "carol");

    let response = complete_google_login(&app).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("http://localhost:5173/auth/callback?token="));
}

#[tokio::test]
async fn test_google_account_cannot_use_password_login() {
    let app = create_router_for_testing();
    complete_google_login(&app).await;

    let response = app
        .clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/login",
            Some(json!({"username": "carol", "password": "anything"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["message"],
        "this account uses Google sign-in. Please use 'Login with Google'"
    );
}

async fn assert_invalid_state(response: Response<Body>) {
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::SET_COOKIE).is_some());
    assert_eq!(
        body_json(response).await["message"],
        "invalid or expired login state"
    );
}

#[tokio::test]
async fn test_google_callback_rejects_forged_state() {
    let app = create_router_for_testing();

    assert_invalid_state(
        google_callback(
            &app,
            TEST_PROVIDER_CODE,
            "state-token",
            Some("jetswitch_oauth_state=state-token"),
        )
        .await,
    )
    .await;
}

#[tokio::test]
async fn test_google_callback_requires_login_cookie() {
    let app = create_router_for_testing();

    // Callback link forwarded to a browser that never started the login
    let attacker = begin_google_login(&app).await;
    assert_invalid_state(google_callback(&app, TEST_PROVIDER_CODE, &attacker.state, None).await)
        .await;

    // Browser holding the cookie of its own login attempt
    let victim = begin_google_login(&app).await;
    assert_invalid_state(
        google_callback(&app, TEST_PROVIDER_CODE, &attacker.state, Some(&victim.cookie)).await,
    )
    .await;
}

#[tokio::test]
async fn test_google_callback_state_is_single_use() {
    let app = create_router_for_testing();
    let login = begin_google_login(&app).await;

    let response = google_callback(&app, TEST_PROVIDER_CODE, &login.state, Some(&login.cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let replay = google_callback(&app, TEST_PROVIDER_CODE, &login.state, Some(&login.cookie)).await;
    assert_invalid_state(replay).await;
}

#[tokio::test]
async fn test_google_callback_provider_failures() {
    let app = create_router_for_testing();

    let login = begin_google_login(&app).await;
    let response = google_callback(&app, "unknown-code", &login.state, Some(&login.cookie)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_ERROR");

    let response = app
        .clone()
        .oneshot(create_json_request(
            "GET",
            "/api/auth/google/callback?error=access_denied",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_concurrent_first_google_logins() {
    let state = create_test_state();
    let app = create_router(state.clone());

    let (a, b) = tokio::join!(complete_google_login(&app), complete_google_login(&app));
    assert_eq!(a.status(), StatusCode::SEE_OTHER);
    assert_eq!(b.status(), StatusCode::SEE_OTHER);

    let pages: Vec<String> = [location(&a), location(&b)]
        .iter()
        .map(|l| l.split('?').next().unwrap().to_string())
        .collect();
    assert!(pages.contains(&"http://localhost:5173/select-user-type".to_string()));
    assert!(pages.contains(&"http://localhost:5173/auth/callback".to_string()));

    let ids: Vec<i64> = [location(&a), location(&b)]
        .iter()
        .map(|l| {
            let token = l.split("token=").nth(1).unwrap();
            state.tokens.validate(token).unwrap().user_id
        })
        .collect();
    assert_eq!(ids[0], ids[1]);
}
