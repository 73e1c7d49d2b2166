mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::create_test_app;

#[tokio::test]
async fn test_audit_survives_household_deletion() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "Casa Jose").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;

    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Mercado",
                "amount": 250000,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.wait_for_audit("MOVEMENT_CREATED", 1).await;

    let (status, _) = app
        .delete(&format!("/households/{}", household_id), &token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    app.wait_for_audit("HOUSEHOLD_DELETED", 1).await;

    let (status, body) = app
        .get(&format!("/admin/audit-logs?user_id={}", jose_id), &token)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let entries = body.as_array().unwrap();
    let actions: Vec<&str> = entries
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"HOUSEHOLD_CREATED"));
    assert!(actions.contains(&"MOVEMENT_CREATED"));
    assert!(actions.contains(&"HOUSEHOLD_DELETED"));

    // Ids stay populated as plain values after the cascade
    for entry in entries {
        assert_eq!(entry["user_id"], jose_id.as_str());
        if entry["action"] == "HOUSEHOLD_DELETED" {
            assert_eq!(entry["household_id"], household_id.as_str());
        }
    }
}

#[tokio::test]
async fn test_audit_query_filters_and_pagination() {
    let app = create_test_app().await;
    let (token, _) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    app.create_category(&token, "Mercado").await;
    app.create_payment_method(&token, "Débito", true).await;

    app.wait_for_audit("PAYMENT_METHOD_CREATED", 1).await;

    let (status, body) = app
        .get("/admin/audit-logs?action=HOUSEHOLD_CREATED", &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "HOUSEHOLD_CREATED");

    let (_, page) = app.get("/admin/audit-logs?limit=2&offset=0", &token).await;
    assert_eq!(page.as_array().unwrap().len(), 2);

    let (_, by_type) = app
        .get("/admin/audit-logs?resource_type=payment_method", &token)
        .await;
    assert_eq!(by_type.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_purges_only_expired_entries() {
    let app = create_test_app().await;
    let (token, _) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    app.wait_for_audit("HOUSEHOLD_CREATED", 1).await;

    sqlx::query(
        "INSERT INTO audit_logs (id, created_at, action, resource_type, success)
         VALUES ('stale', '2020-01-01T00:00:00.000Z', 'MOVEMENT_DELETED', 'movement', 1)",
    )
    .execute(&app.pool)
    .await
    .unwrap();

    let (status, body) = app
        .post("/admin/audit-logs/cleanup", &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["purged"], 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE id = 'stale'")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_failed_mutation_attempts_are_audited() {
    let app = create_test_app().await;
    let (token, _) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    app.create_account(&token, "Ahorros", 0.0).await;

    // Duplicate name conflicts, and the attempt still lands in the log
    let (status, _) = app
        .post(
            "/accounts",
            &token,
            json!({ "name": "Ahorros", "account_type": "savings" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let count = app.wait_for_audit("ACCOUNT_CREATED", 2).await;
    assert_eq!(count, 2);

    let rows: Vec<(bool, Option<String>)> = sqlx::query_as(
        "SELECT success, error_message FROM audit_logs
         WHERE action = 'ACCOUNT_CREATED' ORDER BY success ASC",
    )
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert!(!rows[0].0);
    assert!(rows[0].1.is_some());
    assert!(rows[1].0);

    // Same contract on a validation failure in another resource family
    let (status, _) = app
        .post("/category-groups", &token, json!({ "name": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let failed: i64 = {
        app.wait_for_audit("CATEGORY_GROUP_CREATED", 1).await;
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs
             WHERE action = 'CATEGORY_GROUP_CREATED' AND success = 0",
        )
        .fetch_one(&app.pool)
        .await
        .unwrap()
    };
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_login_failure_is_audited_synchronously() {
    let app = create_test_app().await;
    app.register("jose@example.com", "Jose").await;

    let (status, _) = app
        .request(
            axum::http::Method::POST,
            "/auth/login",
            None,
            None,
            Some(json!({ "email": "jose@example.com", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Synchronous variant: visible without waiting for the drainer
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = 'USER_LOGIN_FAILED'")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_unauthenticated_requests_are_rejected() {
    let app = create_test_app().await;

    let (status, _) = app
        .request(axum::http::Method::GET, "/movements", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(axum::http::Method::GET, "/admin/audit-logs", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
