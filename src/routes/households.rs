use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, HouseholdPathMember},
    error::{AppError, AppResult},
    models::{
        AuditAction, AuditEntry, CreateHousehold, Household, HouseholdWithRole, ResourceType,
        UpdateHousehold,
    },
    services::audit::AuditHandle,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_households).post(create_household))
        .route(
            "/{id}",
            get(get_household)
                .patch(update_household)
                .delete(delete_household),
        )
        .route("/{id}/leave", post(leave_household))
}

async fn list_households(
    auth: AuthUser,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<HouseholdWithRole>>> {
    let households: Vec<HouseholdWithRole> = sqlx::query_as(
        "SELECT h.id, h.name, h.currency_code, h.created_at, m.role
         FROM households h
         JOIN household_members m ON m.household_id = h.id
         WHERE m.user_id = ?
         ORDER BY h.created_at ASC",
    )
    .bind(&auth.user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(households))
}

async fn create_household(
    auth: AuthUser,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateHousehold>,
) -> AppResult<(StatusCode, Json<Household>)> {
    let attempt =
        AuditEntry::new(AuditAction::HouseholdCreated, ResourceType::Household).user(&auth.user_id);

    let result = async {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        let household_id = Uuid::new_v4().to_string();
        let currency = input.currency_code.unwrap_or_else(|| "COP".to_string());

        let mut tx = pool.begin().await?;
        sqlx::query("INSERT INTO households (id, name, currency_code) VALUES (?, ?, ?)")
            .bind(&household_id)
            .bind(name)
            .bind(&currency)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO household_members (household_id, user_id, role) VALUES (?, ?, 'owner')",
        )
        .bind(&household_id)
        .bind(&auth.user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let household: Household = sqlx::query_as("SELECT * FROM households WHERE id = ?")
            .bind(&household_id)
            .fetch_one(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::HouseholdCreated, ResourceType::Household)
                .user(&auth.user_id)
                .household(&household_id)
                .resource(&household_id)
                .new_values(&household),
        );

        Ok((StatusCode::CREATED, Json(household)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn get_household(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Household>> {
    let household: Household = sqlx::query_as("SELECT * FROM households WHERE id = ?")
        .bind(&member.household_id)
        .fetch_one(&pool)
        .await?;

    Ok(Json(household))
}

async fn update_household(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateHousehold>,
) -> AppResult<Json<Household>> {
    let attempt = AuditEntry::new(AuditAction::HouseholdUpdated, ResourceType::Household)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if !member.is_owner() {
            return Err(AppError::Forbidden(
                "Solo un propietario puede modificar el hogar".to_string(),
            ));
        }

        let old: Household = sqlx::query_as("SELECT * FROM households WHERE id = ?")
            .bind(&member.household_id)
            .fetch_one(&pool)
            .await?;

        let name = input.name.unwrap_or_else(|| old.name.clone());
        let currency = input
            .currency_code
            .unwrap_or_else(|| old.currency_code.clone());

        if name.trim().is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        sqlx::query("UPDATE households SET name = ?, currency_code = ? WHERE id = ?")
            .bind(name.trim())
            .bind(&currency)
            .bind(&member.household_id)
            .execute(&pool)
            .await?;

        let updated: Household = sqlx::query_as("SELECT * FROM households WHERE id = ?")
            .bind(&member.household_id)
            .fetch_one(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::HouseholdUpdated, ResourceType::Household)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&member.household_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

/// Deletes the household and everything it owns. Audit entries keep their
/// plain ids and outlive the cascade.
async fn delete_household(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::HouseholdDeleted, ResourceType::Household)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if !member.is_owner() {
            return Err(AppError::Forbidden(
                "Solo un propietario puede eliminar el hogar".to_string(),
            ));
        }

        let old: Household = sqlx::query_as("SELECT * FROM households WHERE id = ?")
            .bind(&member.household_id)
            .fetch_one(&pool)
            .await?;

        sqlx::query("DELETE FROM households WHERE id = ?")
            .bind(&member.household_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::HouseholdDeleted, ResourceType::Household)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&member.household_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn leave_household(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<Json<Value>> {
    let attempt = AuditEntry::new(AuditAction::MemberLeft, ResourceType::Membership)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if member.is_owner() {
            let other_owners: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM household_members
                 WHERE household_id = ? AND user_id != ? AND role = 'owner'",
            )
            .bind(&member.household_id)
            .bind(&member.user_id)
            .fetch_one(&pool)
            .await?;

            if other_owners == 0 {
                return Err(AppError::Forbidden(
                    "El último propietario no puede abandonar el hogar".to_string(),
                ));
            }
        }

        sqlx::query("DELETE FROM household_members WHERE household_id = ? AND user_id = ?")
            .bind(&member.household_id)
            .bind(&member.user_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::MemberLeft, ResourceType::Membership)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&member.user_id),
        );

        Ok(Json(json!({ "left": true })))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
