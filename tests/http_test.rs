#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use reviews::app::{AppState, build_router};
use reviews::auth::{AuthUser, SessionStore};
use reviews::config::Args;
use reviews::service::ReviewService;
use reviews::store::MemoryStore;

struct TestApp {
    router: Router,
    user_token: String,
    admin_token: String,
}

/// Clients are told apart by `X-Forwarded-For`, as behind a proxy
fn test_app() -> TestApp {
    test_app_with(Args {
        trust_proxy: true,
        ..Args::default()
    })
}

fn test_app_with(args: Args) -> TestApp {
    let sessions = SessionStore::new();
    let user_token = sessions.create_session(AuthUser::new("u1", "Ada", "Lovelace"));
    let admin_token = sessions.create_session(AuthUser::new("a1", "Grace", "Hopper").admin());

    let service = ReviewService::with_store(Arc::new(MemoryStore::in_memory()));
    let router = build_router(AppState::new(service, sessions), &args);

    TestApp {
        router,
        user_token,
        admin_token,
    }
}

fn post_json(uri: &str, body: Value, client: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "integration-test")
        .header("x-forwarded-for", client);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header(header::USER_AGENT, "integration-test")
        .header("x-forwarded-for", "10.1.1.1");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_check() {
    let app = test_app();
    let response = app.router.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn status_for_a_new_visitor() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        get("/api/review-popup/status?anonymousId=anon-1", None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shouldShow"], json!(false));
    assert_eq!(body["reason"], json!("new_user"));
    assert_eq!(body["anonymousId"], json!("anon-1"));
    assert!(body["deviceFingerprint"].is_string());
    assert!(body.get("hasReview").is_none());
}

#[tokio::test]
async fn track_activity_counts_and_validates() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/track-activity",
            json!({ "anonymousId": "anon-2", "activityType": "active_time", "data": { "minutes": 3 } }),
            "10.0.0.2",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["activityCount"], json!(1));
    assert_eq!(body["activeTimeMinutes"], json!(3));
    assert_eq!(
        body["meaningfulActions"],
        json!({ "fileUploads": 0, "chartsGenerated": 0, "reportsAnalyzed": 0 })
    );

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/track-activity",
            json!({ "anonymousId": "anon-2", "activityType": "chart_generated" }),
            "10.0.0.2",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meaningfulActions"]["chartsGenerated"], json!(1));
    assert_eq!(body["activityCount"], json!(2));

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/track-activity",
            json!({ "anonymousId": "anon-2", "activityType": "coffee_break" }),
            "10.0.0.2",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid activity type"));

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/track-activity",
            json!({ "anonymousId": "anon-2" }),
            "10.0.0.2",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Activity type is required"));
}

#[tokio::test]
async fn preference_endpoints_share_a_rate_limit() {
    let app = test_app();
    for _ in 0..5 {
        let (status, _) = send(
            &app.router,
            post_json(
                "/api/review-popup/track-activity",
                json!({ "anonymousId": "anon-3", "activityType": "page_view" }),
                "10.0.0.3",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    for _ in 0..5 {
        let (status, _) = send(
            &app.router,
            post_json(
                "/api/review-popup/preference",
                json!({ "anonymousId": "anon-3", "preference": "dismissed" }),
                "10.0.0.3",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-3", "preference": "never" }),
            "10.0.0.3",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body["error"],
        json!("Too many preference updates, please try again later.")
    );

    // Other clients are unaffected
    let (status, _) = send(
        &app.router,
        post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-4", "preference": "never" }),
            "10.0.0.4",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn preference_validation() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-5", "preference": "maybe" }),
            "10.0.0.5",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("preference"));

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-5", "preference": "later", "remindDays": 400 }),
            "10.0.0.5",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("remindDays"));

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-5", "preference": "later", "remindDays": 5 }),
            "10.0.0.5",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preference"], json!("later"));
    assert!(body["remindAt"].is_string());
}

#[tokio::test]
async fn mistyped_body_fields_are_field_errors() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-7", "preference": "later", "remindDays": "abc" }),
            "10.0.0.10",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("remindDays"));
    assert!(body["errors"][0]["message"].is_string());

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/submit",
            json!({
                "rating": 300,
                "title": "Off the scale",
                "review": "Charts from my spreadsheets in seconds.",
            }),
            "10.0.0.11",
            Some(&app.user_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("rating"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/review-popup/track-activity")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "10.0.0.12")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Request body is not valid JSON"));
}

#[tokio::test]
async fn spoofed_forwarded_header_does_not_reset_the_limit() {
    let app = test_app_with(Args {
        preference_rate_limit: 2,
        ..Args::default()
    });
    let peer = SocketAddr::from(([203, 0, 113, 5], 51000));

    let mut statuses = Vec::new();
    for i in 0..3 {
        let mut request = post_json(
            "/api/review-popup/preference",
            json!({ "anonymousId": "anon-8", "preference": "dismissed" }),
            &format!("198.51.100.{}", i),
            None,
        );
        request.extensions_mut().insert(ConnectInfo(peer));
        statuses.push(send(&app.router, request).await.0);
    }
    assert_eq!(
        statuses,
        [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );

    // A different peer still has its own budget
    let mut request = post_json(
        "/api/review-popup/preference",
        json!({ "anonymousId": "anon-9", "preference": "dismissed" }),
        "198.51.100.1",
        None,
    );
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 6], 51000))));
    assert_eq!(send(&app.router, request).await.0, StatusCode::OK);
}

#[tokio::test]
async fn popup_submit_requires_login() {
    let app = test_app();
    let review = json!({
        "rating": 5,
        "title": "Brilliant",
        "review": "Charts from my spreadsheets in seconds.",
        "anonymousId": "anon-6",
    });

    let (status, _) = send(
        &app.router,
        post_json("/api/review-popup/submit", review.clone(), "10.0.0.6", None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/submit",
            review.clone(),
            "10.0.0.6",
            Some(&app.user_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], json!(true));
    assert!(body["reviewId"].is_string());

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/review-popup/submit",
            review,
            "10.0.0.6",
            Some(&app.user_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("You have already submitted a review. You can update it from your profile.")
    );

    let (_, body) = send(
        &app.router,
        get(
            "/api/review-popup/status?anonymousId=anon-6",
            Some(&app.user_token),
        ),
    )
    .await;
    assert_eq!(body["reason"], json!("already_reviewed"));
    assert_eq!(body["hasReview"], json!(true));
}

#[tokio::test]
async fn ratings_moderation_flow() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/ratings/submit",
            json!({ "rating": 4, "title": "Solid", "review": "Does the job." }),
            "10.0.0.7",
            Some(&app.user_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], json!("pending"));
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app.router, get("/api/ratings/admin/pending", Some(&app.user_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app.router, get("/api/ratings/admin/pending", Some(&app.admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], json!(1));
    assert_eq!(body["meta"]["limit"], json!(20));

    let (status, _) = send(
        &app.router,
        post_json(
            &format!("/api/ratings/admin/{}/approve", id),
            json!({}),
            "10.0.0.8",
            Some(&app.admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, get("/api/ratings/public?minRating=4", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], json!(1));
    assert_eq!(body["data"][0]["name"], json!("Ada Lovelace"));

    let (_, body) = send(&app.router, get("/api/review-popup/stats", None)).await;
    assert_eq!(body["totalRatings"], json!(1));
    assert_eq!(body["featuredReviews"][0]["userInitials"], json!("AL"));

    let (status, body) = send(
        &app.router,
        post_json(
            &format!("/api/ratings/{}/helpful", id),
            json!({}),
            "10.0.0.9",
            Some(&app.admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["helpfulVotes"], json!(1));

    let (_, body) = send(&app.router, get("/api/ratings/my-rating", Some(&app.user_token))).await;
    assert_eq!(body["data"]["status"], json!("approved"));
}

#[tokio::test]
async fn duplicate_web_rating_is_409() {
    let app = test_app();
    let rating = json!({ "rating": 5, "title": "Great", "review": "Really great." });
    let (status, _) = send(
        &app.router,
        post_json("/api/ratings/submit", rating.clone(), "10.0.1.1", Some(&app.user_token)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app.router,
        post_json("/api/ratings/submit", rating, "10.0.1.1", Some(&app.user_token)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        json!("You have already submitted a rating. You can update it instead.")
    );
}
