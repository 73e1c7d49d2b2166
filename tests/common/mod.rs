use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tower::ServiceExt;

use gastos_backend::{
    build_router,
    config::Config,
    db,
    services::audit::{spawn_audit_worker, AuditHandle},
    AppState,
};

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub audit: AuditHandle,
}

/// In-memory database app. A single connection keeps every query on the same
/// SQLite memory database.
pub async fn create_test_app() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    let (audit, _worker) = spawn_audit_worker(pool.clone());

    let mut config = Config::from_env();
    config.jwt_secret = "test-secret-key-for-testing".to_string();

    let state = AppState {
        pool: pool.clone(),
        jwt_secret: config.jwt_secret.clone(),
        audit: audit.clone(),
        config,
    };

    TestApp {
        app: build_router(state),
        pool,
        audit,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        household: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(household) = household {
            builder = builder.header("x-household-id", household);
        }

        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, Some(token), None, None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(token), None, Some(body))
            .await
    }

    pub async fn patch(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, path, Some(token), None, Some(body))
            .await
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, path, Some(token), None, Some(body))
            .await
    }

    pub async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, path, Some(token), None, None)
            .await
    }

    /// Registers a user and returns (token, user_id).
    pub async fn register(&self, email: &str, display_name: &str) -> (String, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/register",
                None,
                None,
                Some(json!({
                    "email": email,
                    "password": "password123",
                    "display_name": display_name,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "register failed: {}", body);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    pub async fn create_household(&self, token: &str, name: &str) -> String {
        let (status, body) = self
            .post("/households", token, json!({ "name": name }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create household failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_category(&self, token: &str, name: &str) -> String {
        let (status, group) = self
            .post("/category-groups", token, json!({ "name": "General" }))
            .await;
        let group_id = if status == StatusCode::CREATED {
            group["id"].as_str().unwrap().to_string()
        } else {
            // Group already exists from an earlier call
            let (_, groups) = self.get("/category-groups", token).await;
            groups[0]["id"].as_str().unwrap().to_string()
        };

        let (status, body) = self
            .post(
                "/categories",
                token,
                json!({ "category_group_id": group_id, "name": name }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create category failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_payment_method(&self, token: &str, name: &str, shared: bool) -> String {
        let (status, body) = self
            .post(
                "/payment-methods",
                token,
                json!({
                    "name": name,
                    "method_type": "debit_card",
                    "is_shared_with_household": shared,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create payment method failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_contact(&self, token: &str, household_id: &str, name: &str) -> String {
        let (status, body) = self
            .post(
                &format!("/households/{}/contacts", household_id),
                token,
                json!({ "display_name": name }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create contact failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_account(&self, token: &str, name: &str, initial: f64) -> String {
        let (status, body) = self
            .post(
                "/accounts",
                token,
                json!({ "name": name, "account_type": "savings", "initial_balance": initial }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create account failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// Waits for the audit drainer to flush at least `minimum` entries
    /// matching the action.
    pub async fn wait_for_audit(&self, action: &str, minimum: i64) -> i64 {
        for _ in 0..100 {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = ?")
                    .bind(action)
                    .fetch_one(&self.pool)
                    .await
                    .unwrap();
            if count >= minimum {
                return count;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = ?")
            .bind(action)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
