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
    models::{AuditAction, AuditEntry, CreateIncome, Income, ResourceType, UpdateIncome},
    services::audit::AuditHandle,
    services::movements::validate_amount,
    services::schedule,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_income).post(create_income))
        .route(
            "/{income_id}",
            axum::routing::patch(update_income).delete(delete_income),
        )
}

async fn fetch_income(
    pool: &SqlitePool,
    household_id: &str,
    income_id: &str,
) -> AppResult<Income> {
    let income: Option<Income> =
        sqlx::query_as("SELECT * FROM incomes WHERE id = ? AND household_id = ?")
            .bind(income_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    income.ok_or_else(|| AppError::NotFound("Ingreso no encontrado".to_string()))
}

async fn list_income(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Income>>> {
    let incomes: Vec<Income> = sqlx::query_as(
        "SELECT * FROM incomes WHERE household_id = ?
         ORDER BY income_date DESC, created_at DESC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(incomes))
}

async fn create_income(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateIncome>,
) -> AppResult<(StatusCode, Json<Income>)> {
    let attempt = AuditEntry::new(AuditAction::IncomeCreated, ResourceType::Income)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let amount = validate_amount(input.amount)?;

        let income_date = match &input.income_date {
            Some(date) => {
                schedule::parse_date(date)
                    .ok_or_else(|| AppError::Validation("Fecha inválida".to_string()))?;
                date.clone()
            }
            None => schedule::format_date(schedule::today()),
        };

        let income_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO incomes (id, household_id, user_id, description, amount, income_date)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&income_id)
        .bind(&member.household_id)
        .bind(&member.user_id)
        .bind(&input.description)
        .bind(amount)
        .bind(&income_date)
        .execute(&pool)
        .await?;

        let income = fetch_income(&pool, &member.household_id, &income_id).await?;

        audit.log(
            AuditEntry::new(AuditAction::IncomeCreated, ResourceType::Income)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&income_id)
                .new_values(&income),
        );

        Ok((StatusCode::CREATED, Json(income)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_income(
    Path(income_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateIncome>,
) -> AppResult<Json<Income>> {
    let attempt = AuditEntry::new(AuditAction::IncomeUpdated, ResourceType::Income)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_income(&pool, &member.household_id, &income_id).await?;

        let description = input.description.unwrap_or_else(|| old.description.clone());
        let amount = match input.amount {
            Some(amount) => validate_amount(amount)?,
            None => old.amount,
        };
        let income_date = match &input.income_date {
            Some(date) => {
                schedule::parse_date(date)
                    .ok_or_else(|| AppError::Validation("Fecha inválida".to_string()))?;
                date.clone()
            }
            None => old.income_date.clone(),
        };

        sqlx::query("UPDATE incomes SET description = ?, amount = ?, income_date = ? WHERE id = ?")
            .bind(&description)
            .bind(amount)
            .bind(&income_date)
            .bind(&income_id)
            .execute(&pool)
            .await?;

        let updated = fetch_income(&pool, &member.household_id, &income_id).await?;

        audit.log(
            AuditEntry::new(AuditAction::IncomeUpdated, ResourceType::Income)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&income_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_income(
    Path(income_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::IncomeDeleted, ResourceType::Income)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_income(&pool, &member.household_id, &income_id).await?;

        sqlx::query("DELETE FROM incomes WHERE id = ?")
            .bind(&income_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::IncomeDeleted, ResourceType::Income)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&income_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
