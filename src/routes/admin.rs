use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    config::Config,
    error::AppResult,
    models::{AuditAction, AuditEntry, AuditLogResponse, AuditQuery, ResourceType},
    services::audit::{self, AuditHandle},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .route("/audit-logs/cleanup", post(cleanup_audit_logs))
}

async fn list_audit_logs(
    _auth: AuthUser,
    State(pool): State<SqlitePool>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditLogResponse>>> {
    let rows = audit::query_logs(&pool, &query).await?;
    Ok(Json(rows.into_iter().map(AuditLogResponse::from).collect()))
}

#[derive(Debug, Default, Deserialize)]
struct CleanupRequest {
    /// Overrides the configured retention window.
    days: Option<i64>,
}

async fn cleanup_audit_logs(
    auth: AuthUser,
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    State(audit_handle): State<AuditHandle>,
    body: Option<Json<CleanupRequest>>,
) -> AppResult<Json<Value>> {
    let days = body
        .and_then(|Json(request)| request.days)
        .filter(|&d| d > 0)
        .unwrap_or(config.audit_retention_days);

    let purged = audit::purge_older_than(&pool, days).await?;

    audit_handle.log(
        AuditEntry::new(AuditAction::AuditLogsPurged, ResourceType::AuditLog)
            .user(&auth.user_id)
            .new_values(&json!({ "retention_days": days, "purged": purged })),
    );

    Ok(Json(json!({ "purged": purged })))
}
