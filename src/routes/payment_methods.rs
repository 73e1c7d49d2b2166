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
        AuditAction, AuditEntry, CreatePaymentMethod, PaymentMethod, ResourceType,
        UpdatePaymentMethod, PAYMENT_METHOD_TYPES,
    },
    services::audit::AuditHandle,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_payment_methods).post(create_payment_method))
        .route(
            "/{method_id}",
            get(get_payment_method)
                .patch(update_payment_method)
                .delete(delete_payment_method),
        )
}

async fn fetch_method(
    pool: &SqlitePool,
    household_id: &str,
    method_id: &str,
) -> AppResult<PaymentMethod> {
    let method: Option<PaymentMethod> =
        sqlx::query_as("SELECT * FROM payment_methods WHERE id = ? AND household_id = ?")
            .bind(method_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    method.ok_or_else(|| AppError::NotFound("Medio de pago no encontrado".to_string()))
}

async fn name_taken(
    pool: &SqlitePool,
    household_id: &str,
    name: &str,
    exclude_id: Option<&str>,
) -> AppResult<bool> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM payment_methods WHERE household_id = ? AND name = ? AND id != ?",
    )
    .bind(household_id)
    .bind(name)
    .bind(exclude_id.unwrap_or(""))
    .fetch_optional(pool)
    .await?;
    Ok(existing.is_some())
}

async fn list_payment_methods(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<PaymentMethod>>> {
    // Shared methods are visible household-wide; private ones only to their
    // owner
    let methods: Vec<PaymentMethod> = sqlx::query_as(
        "SELECT * FROM payment_methods
         WHERE household_id = ? AND (is_shared_with_household = 1 OR owner_user_id = ?)
         ORDER BY name ASC",
    )
    .bind(&member.household_id)
    .bind(&member.user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(methods))
}

async fn get_payment_method(
    Path(method_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<PaymentMethod>> {
    let method = fetch_method(&pool, &member.household_id, &method_id).await?;
    Ok(Json(method))
}

async fn create_payment_method(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreatePaymentMethod>,
) -> AppResult<(StatusCode, Json<PaymentMethod>)> {
    let attempt = AuditEntry::new(AuditAction::PaymentMethodCreated, ResourceType::PaymentMethod)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }
        if !PAYMENT_METHOD_TYPES.contains(&input.method_type.as_str()) {
            return Err(AppError::Validation(
                "Tipo de medio de pago inválido".to_string(),
            ));
        }
        if name_taken(&pool, &member.household_id, name, None).await? {
            return Err(AppError::Conflict(
                "Ya existe un medio de pago con ese nombre".to_string(),
            ));
        }

        let method_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO payment_methods (id, household_id, owner_user_id, name, method_type,
                institution, last4, is_shared_with_household)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&method_id)
        .bind(&member.household_id)
        .bind(&member.user_id)
        .bind(name)
        .bind(&input.method_type)
        .bind(&input.institution)
        .bind(&input.last4)
        .bind(input.is_shared_with_household.unwrap_or(false))
        .execute(&pool)
        .await?;

        let method = fetch_method(&pool, &member.household_id, &method_id).await?;

        audit.log(
            AuditEntry::new(AuditAction::PaymentMethodCreated, ResourceType::PaymentMethod)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&method_id)
                .new_values(&method),
        );

        Ok((StatusCode::CREATED, Json(method)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_payment_method(
    Path(method_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdatePaymentMethod>,
) -> AppResult<Json<PaymentMethod>> {
    let attempt = AuditEntry::new(AuditAction::PaymentMethodUpdated, ResourceType::PaymentMethod)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_method(&pool, &member.household_id, &method_id).await?;

        let name = input.name.unwrap_or_else(|| old.name.clone());
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }
        if name != old.name && name_taken(&pool, &member.household_id, &name, Some(&method_id)).await? {
            return Err(AppError::Conflict(
                "Ya existe un medio de pago con ese nombre".to_string(),
            ));
        }

        let method_type = input.method_type.unwrap_or_else(|| old.method_type.clone());
        if !PAYMENT_METHOD_TYPES.contains(&method_type.as_str()) {
            return Err(AppError::Validation(
                "Tipo de medio de pago inválido".to_string(),
            ));
        }

        let institution = input.institution.or_else(|| old.institution.clone());
        let last4 = input.last4.or_else(|| old.last4.clone());
        let is_shared = input
            .is_shared_with_household
            .unwrap_or(old.is_shared_with_household);
        let is_active = input.is_active.unwrap_or(old.is_active);

        sqlx::query(
            "UPDATE payment_methods SET name = ?, method_type = ?, institution = ?, last4 = ?,
                is_shared_with_household = ?, is_active = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&method_type)
        .bind(&institution)
        .bind(&last4)
        .bind(is_shared)
        .bind(is_active)
        .bind(&method_id)
        .execute(&pool)
        .await?;

        let updated = fetch_method(&pool, &member.household_id, &method_id).await?;

        let action = if old.is_active != updated.is_active {
            if updated.is_active {
                AuditAction::PaymentMethodActivated
            } else {
                AuditAction::PaymentMethodDeactivated
            }
        } else {
            AuditAction::PaymentMethodUpdated
        };

        audit.log(
            AuditEntry::new(action, ResourceType::PaymentMethod)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&method_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_payment_method(
    Path(method_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::PaymentMethodDeleted, ResourceType::PaymentMethod)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_method(&pool, &member.household_id, &method_id).await?;

        let referenced: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM movements WHERE payment_method_id = ?)
                  + (SELECT COUNT(*) FROM recurring_templates WHERE payment_method_id = ?)",
        )
        .bind(&method_id)
        .bind(&method_id)
        .fetch_one(&pool)
        .await?;

        if referenced > 0 {
            return Err(AppError::Conflict(
                "El medio de pago tiene movimientos asociados; desactívalo en su lugar".to_string(),
            ));
        }

        sqlx::query("DELETE FROM payment_methods WHERE id = ?")
            .bind(&method_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::PaymentMethodDeleted, ResourceType::PaymentMethod)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&method_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
