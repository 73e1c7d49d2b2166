use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::HouseholdMember,
    error::{AppError, AppResult},
    models::{
        Account, AuditAction, AuditEntry, CreateAccount, ResourceType, UpdateAccount,
        ACCOUNT_TYPES,
    },
    services::audit::AuditHandle,
    services::movements::round_money,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route(
            "/{account_id}",
            get(get_account).patch(update_account).delete(delete_account),
        )
}

async fn fetch_account(
    pool: &SqlitePool,
    household_id: &str,
    account_id: &str,
) -> AppResult<Account> {
    let account: Option<Account> =
        sqlx::query_as("SELECT * FROM accounts WHERE id = ? AND household_id = ?")
            .bind(account_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    account.ok_or_else(|| AppError::NotFound("Cuenta no encontrada".to_string()))
}

async fn name_taken(
    pool: &SqlitePool,
    household_id: &str,
    name: &str,
    exclude_id: Option<&str>,
) -> AppResult<bool> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM accounts WHERE household_id = ? AND name = ? AND id != ?",
    )
    .bind(household_id)
    .bind(name)
    .bind(exclude_id.unwrap_or(""))
    .fetch_optional(pool)
    .await?;
    Ok(existing.is_some())
}

async fn list_accounts(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Account>>> {
    let accounts: Vec<Account> =
        sqlx::query_as("SELECT * FROM accounts WHERE household_id = ? ORDER BY name ASC")
            .bind(&member.household_id)
            .fetch_all(&pool)
            .await?;

    Ok(Json(accounts))
}

async fn get_account(
    Path(account_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Account>> {
    let account = fetch_account(&pool, &member.household_id, &account_id).await?;
    Ok(Json(account))
}

async fn create_account(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateAccount>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let attempt = AuditEntry::new(AuditAction::AccountCreated, ResourceType::Account)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }
        if !ACCOUNT_TYPES.contains(&input.account_type.as_str()) {
            return Err(AppError::Validation("Tipo de cuenta inválido".to_string()));
        }
        if name_taken(&pool, &member.household_id, name, None).await? {
            return Err(AppError::Conflict(
                "Ya existe una cuenta con ese nombre".to_string(),
            ));
        }

        let initial_balance = round_money(input.initial_balance.unwrap_or(0.0));
        let account_id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO accounts (id, household_id, owner_user_id, name, account_type,
                institution, last4, initial_balance, current_balance, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account_id)
        .bind(&member.household_id)
        .bind(&member.user_id)
        .bind(name)
        .bind(&input.account_type)
        .bind(&input.institution)
        .bind(&input.last4)
        .bind(initial_balance)
        .bind(initial_balance)
        .bind(&input.notes)
        .execute(&pool)
        .await?;

        let account = fetch_account(&pool, &member.household_id, &account_id).await?;

        audit.log(
            AuditEntry::new(AuditAction::AccountCreated, ResourceType::Account)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&account_id)
                .new_values(&account),
        );

        Ok((StatusCode::CREATED, Json(account)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_account(
    Path(account_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateAccount>,
) -> AppResult<Json<Account>> {
    let attempt = AuditEntry::new(AuditAction::AccountUpdated, ResourceType::Account)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_account(&pool, &member.household_id, &account_id).await?;

        let name = input.name.unwrap_or_else(|| old.name.clone());
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }
        if name != old.name && name_taken(&pool, &member.household_id, &name, Some(&account_id)).await?
        {
            return Err(AppError::Conflict(
                "Ya existe una cuenta con ese nombre".to_string(),
            ));
        }

        let account_type = input.account_type.unwrap_or_else(|| old.account_type.clone());
        if !ACCOUNT_TYPES.contains(&account_type.as_str()) {
            return Err(AppError::Validation("Tipo de cuenta inválido".to_string()));
        }

        let institution = input.institution.or_else(|| old.institution.clone());
        let last4 = input.last4.or_else(|| old.last4.clone());
        let notes = input.notes.or_else(|| old.notes.clone());
        let is_active = input.is_active.unwrap_or(old.is_active);

        sqlx::query(
            "UPDATE accounts SET name = ?, account_type = ?, institution = ?, last4 = ?,
                notes = ?, is_active = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&account_type)
        .bind(&institution)
        .bind(&last4)
        .bind(&notes)
        .bind(is_active)
        .bind(&account_id)
        .execute(&pool)
        .await?;

        let updated = fetch_account(&pool, &member.household_id, &account_id).await?;

        let action = if old.is_active != updated.is_active {
            if updated.is_active {
                AuditAction::AccountActivated
            } else {
                AuditAction::AccountDeactivated
            }
        } else {
            AuditAction::AccountUpdated
        };

        audit.log(
            AuditEntry::new(action, ResourceType::Account)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&account_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_account(
    Path(account_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::AccountDeleted, ResourceType::Account)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_account(&pool, &member.household_id, &account_id).await?;

        let referenced: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM movements WHERE receiver_account_id = ?)
                  + (SELECT COUNT(*) FROM recurring_templates WHERE receiver_account_id = ?)",
        )
        .bind(&account_id)
        .bind(&account_id)
        .fetch_one(&pool)
        .await?;

        if referenced > 0 {
            return Err(AppError::Conflict(
                "La cuenta tiene movimientos asociados; desactívala en su lugar".to_string(),
            ));
        }

        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(&account_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::AccountDeleted, ResourceType::Account)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&account_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
