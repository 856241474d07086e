use estimate_manager::api::{create_router, create_router_with_config, SecurityConfig};
use estimate_manager::client::{ClientError, EstimateClient};
use estimate_manager::db::Database;
use estimate_manager::models::*;

/// Serve `app` on an ephemeral port and return its `/api` base URL.
async fn spawn(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });
    format!("http://{}/api/", addr)
}

fn seeded_db() -> (Database, String) {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let estimate = db
        .create_estimate(CreateEstimateInput {
            project_name: Some("Remote".to_string()),
            ..Default::default()
        })
        .expect("Failed to create estimate");
    db.with_estimate(&estimate.id, |e| {
        e.epics.add_child(&[], Level::Epic)?;
        e.epics.update_personnel(&[0], "DEV", 6.0)?;
        Ok(())
    })
    .expect("Failed to edit estimate");
    (db, estimate.id)
}

#[tokio::test]
async fn reads_estimates_totals_and_drafts() {
    let (db, id) = seeded_db();
    let base = spawn(create_router(db)).await;
    let client = EstimateClient::new(base, None);

    let estimates = client.list_estimates().await.expect("list failed");
    assert_eq!(estimates.len(), 1);
    assert_eq!(estimates[0].project_name, "Remote");

    let record = client.get_estimate(&id).await.expect("get failed");
    assert_eq!(record.epics.len(), 1);

    let totals = client.get_totals(&id).await.expect("totals failed");
    assert_eq!(totals.grand_total, 6.0);

    assert!(client.list_drafts(&id).await.expect("drafts failed").is_empty());
}

#[tokio::test]
async fn missing_estimate_is_not_found() {
    let (db, _) = seeded_db();
    let base = spawn(create_router(db)).await;
    let client = EstimateClient::new(base, None);

    let err = client.get_estimate("missing").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
}

#[tokio::test]
async fn api_key_is_sent_as_bearer_token() {
    let (db, _) = seeded_db();
    let base = spawn(create_router_with_config(
        db,
        SecurityConfig::with_api_key("secret"),
    ))
    .await;

    let anonymous = EstimateClient::new(base.clone(), None);
    assert!(matches!(
        anonymous.list_estimates().await.unwrap_err(),
        ClientError::Unauthorized
    ));

    let authorized = EstimateClient::new(base, Some("secret".to_string()));
    assert_eq!(authorized.list_estimates().await.expect("list failed").len(), 1);
}
