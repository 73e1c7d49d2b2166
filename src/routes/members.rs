use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    auth::HouseholdPathMember,
    error::{AppError, AppResult},
    models::{
        AddMember, AuditAction, AuditEntry, MemberResponse, ResourceType, Role, UpdateMemberRole,
    },
    services::audit::AuditHandle,
    AppState,
};

#[derive(Deserialize)]
struct MemberPath {
    #[allow(dead_code)]
    id: String,
    user_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_members).post(add_member))
        .route("/{user_id}", axum::routing::patch(update_role).delete(remove_member))
}

async fn list_members(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<MemberResponse>>> {
    let members: Vec<MemberResponse> = sqlx::query_as(
        "SELECT m.user_id, u.email, u.display_name, m.role, m.joined_at
         FROM household_members m
         JOIN users u ON m.user_id = u.id
         WHERE m.household_id = ?
         ORDER BY m.joined_at ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(members))
}

async fn add_member(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<AddMember>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    let attempt = AuditEntry::new(AuditAction::MemberAdded, ResourceType::Membership)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if !member.is_owner() {
            return Err(AppError::Forbidden(
                "Solo un propietario puede agregar miembros".to_string(),
            ));
        }

        let role = match &input.role {
            Some(role) => Role::from_str(role)
                .ok_or_else(|| AppError::Validation("Rol inválido".to_string()))?,
            None => Role::Member,
        };

        let email = input.email.trim().to_lowercase();
        let user_id: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&pool)
            .await?;

        let user_id =
            user_id.ok_or_else(|| AppError::NotFound("Usuario no encontrado".to_string()))?;

        let already: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM household_members WHERE household_id = ? AND user_id = ?",
        )
        .bind(&member.household_id)
        .bind(&user_id)
        .fetch_optional(&pool)
        .await?;

        if already.is_some() {
            return Err(AppError::Conflict("Ya es miembro del hogar".to_string()));
        }

        sqlx::query("INSERT INTO household_members (household_id, user_id, role) VALUES (?, ?, ?)")
            .bind(&member.household_id)
            .bind(&user_id)
            .bind(role.as_str())
            .execute(&pool)
            .await?;

        let added: MemberResponse = sqlx::query_as(
            "SELECT m.user_id, u.email, u.display_name, m.role, m.joined_at
             FROM household_members m
             JOIN users u ON m.user_id = u.id
             WHERE m.household_id = ? AND m.user_id = ?",
        )
        .bind(&member.household_id)
        .bind(&user_id)
        .fetch_one(&pool)
        .await?;

        audit.log(
            AuditEntry::new(AuditAction::MemberAdded, ResourceType::Membership)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&user_id)
                .new_values(&added),
        );

        Ok((StatusCode::CREATED, Json(added)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_role(
    Path(path): Path<MemberPath>,
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateMemberRole>,
) -> AppResult<Json<Value>> {
    let attempt = AuditEntry::new(AuditAction::MemberRoleUpdated, ResourceType::Membership)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if !member.is_owner() {
            return Err(AppError::Forbidden(
                "Solo un propietario puede cambiar roles".to_string(),
            ));
        }

        let new_role = Role::from_str(&input.role)
            .ok_or_else(|| AppError::Validation("Rol inválido".to_string()))?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT role FROM household_members WHERE household_id = ? AND user_id = ?",
        )
        .bind(&member.household_id)
        .bind(&path.user_id)
        .fetch_optional(&pool)
        .await?;

        let current =
            current.ok_or_else(|| AppError::NotFound("Miembro no encontrado".to_string()))?;

        // Demoting an owner must leave at least one owner behind
        if current == Role::Owner.as_str() && new_role != Role::Owner {
            let other_owners: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM household_members
                 WHERE household_id = ? AND user_id != ? AND role = 'owner'",
            )
            .bind(&member.household_id)
            .bind(&path.user_id)
            .fetch_one(&pool)
            .await?;

            if other_owners == 0 {
                return Err(AppError::Forbidden(
                    "El hogar debe conservar al menos un propietario".to_string(),
                ));
            }
        }

        sqlx::query("UPDATE household_members SET role = ? WHERE household_id = ? AND user_id = ?")
            .bind(new_role.as_str())
            .bind(&member.household_id)
            .bind(&path.user_id)
            .execute(&pool)
            .await?;

        let action = if new_role == Role::Owner && current != Role::Owner.as_str() {
            AuditAction::OwnershipTransferred
        } else {
            AuditAction::MemberRoleUpdated
        };

        audit.log(
            AuditEntry::new(action, ResourceType::Membership)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&path.user_id)
                .old(&json!({ "role": current }))
                .new_values(&json!({ "role": new_role.as_str() })),
        );

        Ok(Json(json!({ "updated": true })))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn remove_member(
    Path(path): Path<MemberPath>,
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::MemberRemoved, ResourceType::Membership)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if !member.is_owner() {
            return Err(AppError::Forbidden(
                "Solo un propietario puede retirar miembros".to_string(),
            ));
        }

        let current: Option<String> = sqlx::query_scalar(
            "SELECT role FROM household_members WHERE household_id = ? AND user_id = ?",
        )
        .bind(&member.household_id)
        .bind(&path.user_id)
        .fetch_optional(&pool)
        .await?;

        let current =
            current.ok_or_else(|| AppError::NotFound("Miembro no encontrado".to_string()))?;

        if current == Role::Owner.as_str() {
            let other_owners: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM household_members
                 WHERE household_id = ? AND user_id != ? AND role = 'owner'",
            )
            .bind(&member.household_id)
            .bind(&path.user_id)
            .fetch_one(&pool)
            .await?;

            if other_owners == 0 {
                return Err(AppError::Forbidden(
                    "No puedes retirar al último propietario".to_string(),
                ));
            }
        }

        sqlx::query("DELETE FROM household_members WHERE household_id = ? AND user_id = ?")
            .bind(&member.household_id)
            .bind(&path.user_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::MemberRemoved, ResourceType::Membership)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&path.user_id)
                .old(&json!({ "role": current })),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
