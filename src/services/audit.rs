use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{AuditEntry, AuditLogRow, AuditQuery};

/// Entries queued beyond this are dropped rather than blocking the mutation
/// path.
pub const AUDIT_QUEUE_CAPACITY: usize = 1000;

/// Max entries written per batch by the drainer.
const BATCH_SIZE: usize = 64;

fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Producer side of the audit queue. Cheap to clone; `log` never blocks and
/// never fails the caller.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEntry>,
    dropped: Arc<AtomicU64>,
}

impl AuditHandle {
    /// Non-blocking enqueue. A saturated queue drops the entry and bumps the
    /// drop counter.
    pub fn log(&self, entry: AuditEntry) {
        if self.tx.try_send(entry).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                event = "audit.dropped",
                dropped_total = dropped,
                "Audit queue full, entry dropped"
            );
        }
    }

    /// Entries dropped since startup. Operational metric only.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Completes the entry-per-attempt contract for handlers that log their
    /// own success entry: an error result leaves a failed entry for the
    /// attempted action instead.
    pub fn log_failed_attempt<T>(&self, attempt: AuditEntry, result: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &result {
            self.log(attempt.failed(&e.to_string()));
        }
        result
    }
}

/// Starts the drainer task and returns the producer handle. The task exits
/// once every handle is dropped and the queue is empty.
pub fn spawn_audit_worker(pool: SqlitePool) -> (AuditHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AuditEntry>(AUDIT_QUEUE_CAPACITY);
    let handle = AuditHandle {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };

    let worker = tokio::spawn(async move {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        while let Some(entry) = rx.recv().await {
            batch.push(entry);
            while batch.len() < BATCH_SIZE {
                match rx.try_recv() {
                    Ok(entry) => batch.push(entry),
                    Err(_) => break,
                }
            }

            if let Err(e) = write_batch(&pool, &batch).await {
                // Audit writes never abort anything upstream
                tracing::error!("Failed to write audit batch of {}: {}", batch.len(), e);
            }
            batch.clear();
        }
        tracing::debug!("Audit drainer stopped");
    });

    (handle, worker)
}

async fn write_batch(pool: &SqlitePool, batch: &[AuditEntry]) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    for entry in batch {
        insert_entry(&mut *tx, entry).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_entry<'e, E>(executor: E, entry: &AuditEntry) -> AppResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO audit_logs (
            id, created_at, user_id, household_id, action, resource_type,
            resource_id, old_values, new_values, success, error_message, ip, user_agent
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(now_timestamp())
    .bind(&entry.user_id)
    .bind(&entry.household_id)
    .bind(entry.action.as_str())
    .bind(entry.resource_type.as_str())
    .bind(&entry.resource_id)
    .bind(entry.old_values.as_ref().map(|v| v.to_string()))
    .bind(entry.new_values.as_ref().map(|v| v.to_string()))
    .bind(entry.success)
    .bind(&entry.error_message)
    .bind(&entry.ip)
    .bind(&entry.user_agent)
    .execute(executor)
    .await?;

    Ok(())
}

/// Synchronous write, reserved for login and account deletion where the
/// entry must be durable before the reply.
pub async fn log_sync(pool: &SqlitePool, entry: AuditEntry) -> AppResult<()> {
    insert_entry(pool, &entry).await
}

/// Administrative query with filters and limit/offset pagination, newest
/// first.
pub async fn query_logs(pool: &SqlitePool, query: &AuditQuery) -> AppResult<Vec<AuditLogRow>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(action) = &query.action {
        conditions.push("action = ?");
        binds.push(action.clone());
    }
    if let Some(resource_type) = &query.resource_type {
        conditions.push("resource_type = ?");
        binds.push(resource_type.clone());
    }
    if let Some(resource_id) = &query.resource_id {
        conditions.push("resource_id = ?");
        binds.push(resource_id.clone());
    }
    if let Some(household_id) = &query.household_id {
        conditions.push("household_id = ?");
        binds.push(household_id.clone());
    }
    if let Some(user_id) = &query.user_id {
        conditions.push("user_id = ?");
        binds.push(user_id.clone());
    }
    if let Some(start_time) = &query.start_time {
        conditions.push("created_at >= ?");
        binds.push(start_time.clone());
    }
    if let Some(end_time) = &query.end_time {
        conditions.push("created_at <= ?");
        binds.push(end_time.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT * FROM audit_logs{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        where_clause
    );

    let mut query_builder = sqlx::query_as::<_, AuditLogRow>(&sql);
    for bind in &binds {
        query_builder = query_builder.bind(bind);
    }
    query_builder = query_builder
        .bind(query.limit.unwrap_or(100).clamp(1, 1000))
        .bind(query.offset.unwrap_or(0).max(0));

    Ok(query_builder.fetch_all(pool).await?)
}

/// Retention cleanup: plain DELETE of entries older than the cutoff.
pub async fn purge_older_than(pool: &SqlitePool, retention_days: i64) -> AppResult<u64> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days))
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();

    let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < ?")
        .bind(&cutoff)
        .execute(pool)
        .await?;

    let purged = result.rows_affected();
    tracing::info!(purged = purged, cutoff = %cutoff, "Audit retention cleanup");
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, ResourceType};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");

        crate::db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn entry(action: AuditAction) -> AuditEntry {
        AuditEntry::new(action, ResourceType::Movement)
            .user("user-1")
            .household("household-1")
            .resource("movement-1")
    }

    #[tokio::test]
    async fn test_worker_drains_queued_entries() {
        let pool = setup_test_db().await;
        let (handle, worker) = spawn_audit_worker(pool.clone());

        handle.log(entry(AuditAction::MovementCreated));
        handle.log(entry(AuditAction::MovementUpdated));
        handle.log(entry(AuditAction::MovementDeleted));

        drop(handle);
        worker.await.expect("Worker panicked");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_log_sync_writes_immediately() {
        let pool = setup_test_db().await;

        log_sync(&pool, entry(AuditAction::UserLoggedIn).failed("bad password"))
            .await
            .expect("log_sync failed");

        let row: AuditLogRow = sqlx::query_as("SELECT * FROM audit_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.action, "USER_LOGGED_IN");
        assert!(!row.success);
        assert_eq!(row.error_message.as_deref(), Some("bad password"));
    }

    #[tokio::test]
    async fn test_query_filters_by_action_and_user() {
        let pool = setup_test_db().await;

        log_sync(&pool, entry(AuditAction::MovementCreated)).await.unwrap();
        log_sync(&pool, entry(AuditAction::MovementDeleted)).await.unwrap();
        log_sync(
            &pool,
            AuditEntry::new(AuditAction::MovementCreated, ResourceType::Movement).user("user-2"),
        )
        .await
        .unwrap();

        let rows = query_logs(
            &pool,
            &AuditQuery {
                action: Some("MOVEMENT_CREATED".to_string()),
                user_id: Some("user-1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "MOVEMENT_CREATED");
        assert_eq!(rows[0].user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_entries() {
        let pool = setup_test_db().await;

        log_sync(&pool, entry(AuditAction::MovementCreated)).await.unwrap();

        // Backdate one entry past the retention window
        sqlx::query(
            "INSERT INTO audit_logs (id, created_at, action, resource_type, success)
             VALUES ('old', '2020-01-01T00:00:00.000Z', 'MOVEMENT_DELETED', 'movement', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let purged = purge_older_than(&pool, 90).await.unwrap();
        assert_eq!(purged, 1);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_entries_survive_entity_deletion() {
        let pool = setup_test_db().await;

        sqlx::query("INSERT INTO users (id, email, display_name, password_hash) VALUES ('u1', 'a@b.c', 'A', 'x')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO households (id, name, currency_code) VALUES ('h1', 'Casa', 'COP')")
            .execute(&pool)
            .await
            .unwrap();

        log_sync(
            &pool,
            AuditEntry::new(AuditAction::HouseholdCreated, ResourceType::Household)
                .user("u1")
                .household("h1")
                .resource("h1"),
        )
        .await
        .unwrap();

        sqlx::query("DELETE FROM households WHERE id = 'h1'")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM users WHERE id = 'u1'")
            .execute(&pool)
            .await
            .unwrap();

        let row: AuditLogRow = sqlx::query_as("SELECT * FROM audit_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.user_id.as_deref(), Some("u1"));
        assert_eq!(row.household_id.as_deref(), Some("h1"));
    }
}
