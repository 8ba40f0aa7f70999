//! E2E tests for health check and basic server functionality

mod common;

use common::TestServer;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_migrations_applied_at_startup() {
    let server = TestServer::new().await;

    let applied: Vec<String> =
        sqlx::query_scalar("SELECT filename FROM schema_migrations ORDER BY filename")
            .fetch_all(server.state.db.pool())
            .await
            .unwrap();
    assert_eq!(applied, vec!["001_init.sql".to_string()]);

    // Re-running is a no-op
    let report = server
        .state
        .db
        .migrate(&server.state.config.database.migrations_dir)
        .await
        .unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    server.login_as("alice").await;

    let response = server
        .client
        .get(&server.url("/me"))
        .header("Cookie", "blazing_session=garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .get(&server.url("/metrics"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(
        body.contains(r#"blazing_logins_total{outcome="success"}"#),
        "missing login counter in:\n{body}"
    );
    assert!(body.contains(r#"blazing_session_rejections_total{reason="invalid"}"#));
    assert!(body.contains("blazing_migrations_applied_total"));
    assert!(body.contains("blazing_http_requests_total"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/nonexistent"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Resource not found");
}
