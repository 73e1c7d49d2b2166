use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::HouseholdPathMember,
    error::{AppError, AppResult},
    models::{
        AuditAction, AuditEntry, Contact, CreateContact, MemberResponse, ResourceType,
        UpdateContact,
    },
    services::audit::AuditHandle,
    AppState,
};

#[derive(Deserialize)]
struct ContactPath {
    #[allow(dead_code)]
    id: String,
    contact_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_contacts).post(create_contact))
        .route(
            "/{contact_id}",
            axum::routing::patch(update_contact).delete(delete_contact),
        )
        .route("/{contact_id}/promote", post(promote_contact))
}

async fn fetch_contact(
    pool: &SqlitePool,
    household_id: &str,
    contact_id: &str,
) -> AppResult<Contact> {
    let contact: Option<Contact> =
        sqlx::query_as("SELECT * FROM contacts WHERE id = ? AND household_id = ?")
            .bind(contact_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    contact.ok_or_else(|| AppError::NotFound("Contacto no encontrado".to_string()))
}

async fn list_contacts(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Contact>>> {
    let contacts: Vec<Contact> = sqlx::query_as(
        "SELECT * FROM contacts WHERE household_id = ? ORDER BY display_name ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(contacts))
}

async fn create_contact(
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateContact>,
) -> AppResult<(StatusCode, Json<Contact>)> {
    let attempt = AuditEntry::new(AuditAction::ContactCreated, ResourceType::Contact)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let display_name = input.display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        if let Some(linked_user_id) = &input.linked_user_id {
            let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
                .bind(linked_user_id)
                .fetch_optional(&pool)
                .await?;
            if exists.is_none() {
                return Err(AppError::NotFound(
                    "El usuario vinculado no existe".to_string(),
                ));
            }
        }

        let contact_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO contacts (id, household_id, display_name, email, phone, linked_user_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&contact_id)
        .bind(&member.household_id)
        .bind(display_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.linked_user_id)
        .execute(&pool)
        .await?;

        let contact = fetch_contact(&pool, &member.household_id, &contact_id).await?;

        audit.log(
            AuditEntry::new(AuditAction::ContactCreated, ResourceType::Contact)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&contact_id)
                .new_values(&contact),
        );

        Ok((StatusCode::CREATED, Json(contact)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_contact(
    Path(path): Path<ContactPath>,
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateContact>,
) -> AppResult<Json<Contact>> {
    let attempt = AuditEntry::new(AuditAction::ContactUpdated, ResourceType::Contact)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_contact(&pool, &member.household_id, &path.contact_id).await?;

        let display_name = input
            .display_name
            .unwrap_or_else(|| old.display_name.clone());
        let email = input.email.or_else(|| old.email.clone());
        let phone = input.phone.or_else(|| old.phone.clone());
        let is_active = input.is_active.unwrap_or(old.is_active);

        // Empty string unlinks; absent leaves the link untouched
        let linked_user_id = match &input.linked_user_id {
            Some(id) if id.is_empty() => None,
            Some(id) => {
                let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&pool)
                    .await?;
                if exists.is_none() {
                    return Err(AppError::NotFound(
                        "El usuario vinculado no existe".to_string(),
                    ));
                }
                Some(id.clone())
            }
            None => old.linked_user_id.clone(),
        };

        sqlx::query(
            "UPDATE contacts SET display_name = ?, email = ?, phone = ?, linked_user_id = ?,
             is_active = ? WHERE id = ?",
        )
        .bind(display_name.trim())
        .bind(&email)
        .bind(&phone)
        .bind(&linked_user_id)
        .bind(is_active)
        .bind(&path.contact_id)
        .execute(&pool)
        .await?;

        let updated = fetch_contact(&pool, &member.household_id, &path.contact_id).await?;

        let action = if old.linked_user_id.is_none() && updated.linked_user_id.is_some() {
            AuditAction::ContactLinked
        } else if old.linked_user_id.is_some() && updated.linked_user_id.is_none() {
            AuditAction::ContactUnlinked
        } else if old.is_active != updated.is_active {
            if updated.is_active {
                AuditAction::ContactActivated
            } else {
                AuditAction::ContactDeactivated
            }
        } else {
            AuditAction::ContactUpdated
        };

        audit.log(
            AuditEntry::new(action, ResourceType::Contact)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&path.contact_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_contact(
    Path(path): Path<ContactPath>,
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::ContactDeleted, ResourceType::Contact)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_contact(&pool, &member.household_id, &path.contact_id).await?;

        // Ledger rows keep meaning through their contact; deactivate instead
        let referenced: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM movements
                     WHERE payer_contact_id = ? OR counterparty_contact_id = ?)
                  + (SELECT COUNT(*) FROM movement_participants WHERE participant_contact_id = ?)
                  + (SELECT COUNT(*) FROM recurring_templates
                     WHERE payer_contact_id = ? OR counterparty_contact_id = ?)",
        )
        .bind(&path.contact_id)
        .bind(&path.contact_id)
        .bind(&path.contact_id)
        .bind(&path.contact_id)
        .bind(&path.contact_id)
        .fetch_one(&pool)
        .await?;

        if referenced > 0 {
            return Err(AppError::Conflict(
                "El contacto tiene movimientos asociados; desactívalo en su lugar".to_string(),
            ));
        }

        sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(&path.contact_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::ContactDeleted, ResourceType::Contact)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&path.contact_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

/// Turns a linked contact into a full member of the household.
async fn promote_contact(
    Path(path): Path<ContactPath>,
    HouseholdPathMember(member): HouseholdPathMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    let attempt = AuditEntry::new(AuditAction::ContactPromoted, ResourceType::Contact)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        if !member.is_owner() {
            return Err(AppError::Forbidden(
                "Solo un propietario puede promover contactos".to_string(),
            ));
        }

        let contact = fetch_contact(&pool, &member.household_id, &path.contact_id).await?;

        let linked_user_id = contact.linked_user_id.clone().ok_or_else(|| {
            AppError::Dependency(
                "El contacto debe estar vinculado a un usuario registrado".to_string(),
            )
        })?;

        let already: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM household_members WHERE household_id = ? AND user_id = ?",
        )
        .bind(&member.household_id)
        .bind(&linked_user_id)
        .fetch_optional(&pool)
        .await?;

        if already.is_some() {
            return Err(AppError::Conflict("Ya es miembro del hogar".to_string()));
        }

        sqlx::query(
            "INSERT INTO household_members (household_id, user_id, role) VALUES (?, ?, 'member')",
        )
        .bind(&member.household_id)
        .bind(&linked_user_id)
        .execute(&pool)
        .await?;

        let added: MemberResponse = sqlx::query_as(
            "SELECT m.user_id, u.email, u.display_name, m.role, m.joined_at
             FROM household_members m
             JOIN users u ON m.user_id = u.id
             WHERE m.household_id = ? AND m.user_id = ?",
        )
        .bind(&member.household_id)
        .bind(&linked_user_id)
        .fetch_one(&pool)
        .await?;

        audit.log(
            AuditEntry::new(AuditAction::ContactPromoted, ResourceType::Contact)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&path.contact_id)
                .old(&contact)
                .new_values(&added),
        );

        Ok((StatusCode::CREATED, Json(added)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
