use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_test::TestServer;
use estimate_manager::api::{create_app, AppState, SecurityConfig};
use estimate_manager::db::Database;
use estimate_manager::models::*;
use estimate_manager::tracker::{TrackerClient, TrackerConfig, TrackerError};
use serde_json::{json, Value};

/// A request as the stub tracker saw it: the API key header and the body.
type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

#[derive(Clone)]
struct StubTracker {
    status: StatusCode,
    seen: Seen,
}

async fn create_issue(
    State(stub): State<StubTracker>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = headers
        .get("X-Redmine-API-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    stub.seen.lock().unwrap().push((key, body));

    if stub.status.is_success() {
        (stub.status, Json(json!({ "issue": { "id": 42 } }))).into_response()
    } else {
        (stub.status, "tracker says no").into_response()
    }
}

/// Serve a tracker stub answering `/issues.json` with `status`.
async fn spawn_tracker(status: StatusCode) -> (TrackerConfig, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/issues.json", post(create_issue))
        .with_state(StubTracker {
            status,
            seen: seen.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Stub tracker failed");
    });

    let config = TrackerConfig {
        base_url: format!("http://{}", addr),
        project_id: 9,
        ..TrackerConfig::default()
    };
    (config, seen)
}

fn billing_estimate() -> Estimate {
    let mut estimate = Estimate::new(
        "Billing",
        chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
    );
    estimate.epics.add_child(&[], Level::Epic).unwrap();
    estimate
        .epics
        .update_personnel(&[0], "DEV", 12.0)
        .unwrap();
    estimate
}

mod client {
    use super::*;

    #[tokio::test]
    async fn returns_the_created_issue_id() {
        let (config, seen) = spawn_tracker(StatusCode::CREATED).await;
        let tracker = TrackerClient::new(config);

        let issue_id = tracker
            .create_issue("user-key", &billing_estimate())
            .await
            .expect("create_issue failed");
        assert_eq!(issue_id, 42);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (key, body) = &seen[0];
        assert_eq!(key.as_deref(), Some("user-key"));
        assert_eq!(body["issue"]["subject"], "Estimate: Billing");
        assert_eq!(body["issue"]["project_id"], 9);
        assert_eq!(body["issue"]["tracker_id"], 2);
    }

    #[tokio::test]
    async fn refused_keys_are_unauthorized() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let (config, _) = spawn_tracker(status).await;
            let err = TrackerClient::new(config)
                .create_issue("bad-key", &billing_estimate())
                .await
                .unwrap_err();
            assert!(matches!(err, TrackerError::Unauthorized), "{status}: {err}");
        }
    }

    #[tokio::test]
    async fn other_failures_are_rejected_with_the_body() {
        let (config, _) = spawn_tracker(StatusCode::UNPROCESSABLE_ENTITY).await;
        let err = TrackerClient::new(config)
            .create_issue("user-key", &billing_estimate())
            .await
            .unwrap_err();

        match err {
            TrackerError::Rejected { status, body } => {
                assert_eq!(status.as_u16(), 422);
                assert_eq!(body, "tracker says no");
            }
            other => panic!("expected Rejected, got {other}"),
        }
    }
}

mod endpoint {
    use super::*;

    async fn setup(status: StatusCode) -> (TestServer, String, Seen) {
        let (config, seen) = spawn_tracker(status).await;
        let db = Database::open_memory().expect("Failed to create database");
        db.migrate().expect("Failed to migrate");
        let estimate = db
            .create_estimate(CreateEstimateInput {
                project_name: Some("Billing".to_string()),
                ..Default::default()
            })
            .expect("Failed to create estimate");

        let app = create_app(AppState::with_tracker(db, config), SecurityConfig::disabled());
        let server = TestServer::new(app).expect("Failed to create test server");
        (server, estimate.id, seen)
    }

    #[tokio::test]
    async fn forwards_the_caller_key_and_returns_the_issue_id() {
        let (server, id, seen) = setup(StatusCode::CREATED).await;

        let response = server
            .post("/api/tracker/issues")
            .add_header("X-Tracker-API-Key", "caller-key")
            .json(&json!({ "estimate_id": id }))
            .await;

        response.assert_status_ok();
        response.assert_json(&json!({ "issue_id": 42 }));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("caller-key"));
    }

    #[tokio::test]
    async fn refused_key_is_401() {
        let (server, id, _) = setup(StatusCode::UNAUTHORIZED).await;

        server
            .post("/api/tracker/issues")
            .add_header("X-Redmine-API-Key", "bad-key")
            .json(&json!({ "estimate_id": id }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tracker_failure_is_502() {
        let (server, id, _) = setup(StatusCode::INTERNAL_SERVER_ERROR).await;

        let response = server
            .post("/api/tracker/issues")
            .add_header("X-Tracker-API-Key", "caller-key")
            .json(&json!({ "estimate_id": id }))
            .await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        assert_eq!(response.text(), "Failed to create tracker issue");
    }
}
