pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use axum::{extract::FromRef, middleware, routing::get, Json, Router};
use serde_json::json;
use sqlx::SqlitePool;

use auth::JwtSecret;
use config::Config;
use services::audit::AuditHandle;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt_secret: String,
    pub audit: AuditHandle,
    pub config: Config,
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for String {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_secret.clone()
    }
}

impl FromRef<AppState> for AuditHandle {
    fn from_ref(state: &AppState) -> Self {
        state.audit.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

/// Middleware to inject the JWT secret and pool into request extensions,
/// where the auth extractors read them.
async fn inject_extensions(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    request
        .extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    request.extensions_mut().insert(state.pool.clone());
    next.run(request).await
}

/// Full application router. Tests build it against an in-memory pool.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/version",
            get(|| async { Json(json!({ "version": env!("CARGO_PKG_VERSION") })) }),
        )
        .nest("/auth", routes::auth::router())
        .merge(routes::auth::me_router())
        .nest("/households", routes::households::router())
        .nest("/households/{id}/members", routes::members::router())
        .nest("/households/{id}/contacts", routes::contacts::router())
        .nest("/accounts", routes::accounts::router())
        .nest("/payment-methods", routes::payment_methods::router())
        .nest("/category-groups", routes::categories::groups_router())
        .nest("/categories", routes::categories::categories_router())
        .nest("/budgets", routes::budgets::router())
        .nest("/income", routes::income::router())
        .nest("/movements", routes::movements::router())
        .nest("/movement-form-config", routes::movements::form_config_router())
        .nest("/api/recurring-movements", routes::recurring::router())
        .nest("/admin", routes::admin::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_extensions,
        ))
        .with_state(state)
}
