use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::HouseholdMember,
    error::{AppError, AppResult},
    models::{
        AuditAction, AuditEntry, Budget, BudgetStatus, CopyBudgets, ResourceType, UpsertBudget,
    },
    services::audit::AuditHandle,
    services::movements::{round_money, validate_amount},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", put(upsert_budget))
        .route("/copy", post(copy_budgets))
        // GET takes a YYYY-MM month, DELETE takes a budget id
        .route("/{key}", get(month_status).delete(delete_budget))
}

fn validate_month(month: &str) -> AppResult<()> {
    let valid = month.len() == 7
        && month.as_bytes()[4] == b'-'
        && month[..4].chars().all(|c| c.is_ascii_digit())
        && month[5..].chars().all(|c| c.is_ascii_digit())
        && matches!(month[5..].parse::<u32>(), Ok(1..=12));
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation("Mes inválido, usa AAAA-MM".to_string()))
    }
}

/// Budget vs spent per category for one month.
async fn month_status(
    Path(month): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<BudgetStatus>>> {
    validate_month(&month)?;

    let budgets: Vec<(String, String, String, f64)> = sqlx::query_as(
        "SELECT b.id, b.category_id, c.name, b.amount
         FROM budgets b
         JOIN categories c ON b.category_id = c.id
         WHERE b.household_id = ? AND b.month = ?
         ORDER BY c.name ASC",
    )
    .bind(&member.household_id)
    .bind(&month)
    .fetch_all(&pool)
    .await?;

    let mut result = Vec::with_capacity(budgets.len());
    for (budget_id, category_id, category_name, budget_amount) in budgets {
        let spent: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM movements
             WHERE household_id = ? AND category_id = ? AND movement_date LIKE ?",
        )
        .bind(&member.household_id)
        .bind(&category_id)
        .bind(format!("{}-%", month))
        .fetch_one(&pool)
        .await?;

        let spent = round_money(spent.unwrap_or(0.0));
        result.push(BudgetStatus {
            budget_id,
            category_id,
            category_name,
            month: month.clone(),
            budget_amount,
            spent,
            remaining: round_money(budget_amount - spent),
        });
    }

    Ok(Json(result))
}

async fn upsert_budget(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpsertBudget>,
) -> AppResult<Json<Budget>> {
    let attempt = AuditEntry::new(AuditAction::BudgetUpserted, ResourceType::Budget)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        validate_month(&input.month)?;
        let amount = validate_amount(input.amount)?;

        let category: Option<String> =
            sqlx::query_scalar("SELECT id FROM categories WHERE id = ? AND household_id = ?")
                .bind(&input.category_id)
                .bind(&member.household_id)
                .fetch_optional(&pool)
                .await?;
        if category.is_none() {
            return Err(AppError::NotFound("Categoría no encontrada".to_string()));
        }

        let existing: Option<Budget> = sqlx::query_as(
            "SELECT * FROM budgets WHERE household_id = ? AND category_id = ? AND month = ?",
        )
        .bind(&member.household_id)
        .bind(&input.category_id)
        .bind(&input.month)
        .fetch_optional(&pool)
        .await?;

        let budget_id = match &existing {
            Some(budget) => {
                sqlx::query("UPDATE budgets SET amount = ? WHERE id = ?")
                    .bind(amount)
                    .bind(&budget.id)
                    .execute(&pool)
                    .await?;
                budget.id.clone()
            }
            None => {
                let budget_id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO budgets (id, household_id, category_id, month, amount)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&budget_id)
                .bind(&member.household_id)
                .bind(&input.category_id)
                .bind(&input.month)
                .bind(amount)
                .execute(&pool)
                .await?;
                budget_id
            }
        };

        let budget: Budget = sqlx::query_as("SELECT * FROM budgets WHERE id = ?")
            .bind(&budget_id)
            .fetch_one(&pool)
            .await?;

        let mut entry = AuditEntry::new(AuditAction::BudgetUpserted, ResourceType::Budget)
            .user(&member.user_id)
            .household(&member.household_id)
            .resource(&budget_id)
            .new_values(&budget);
        if let Some(existing) = &existing {
            entry = entry.old(existing);
        }
        audit.log(entry);

        Ok(Json(budget))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_budget(
    Path(budget_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::BudgetDeleted, ResourceType::Budget)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old: Option<Budget> =
            sqlx::query_as("SELECT * FROM budgets WHERE id = ? AND household_id = ?")
                .bind(&budget_id)
                .bind(&member.household_id)
                .fetch_optional(&pool)
                .await?;
        let old = old.ok_or_else(|| AppError::NotFound("Presupuesto no encontrado".to_string()))?;

        sqlx::query("DELETE FROM budgets WHERE id = ?")
            .bind(&budget_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::BudgetDeleted, ResourceType::Budget)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&budget_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

/// Copies every budget row of one month into another. The target month must
/// be empty.
async fn copy_budgets(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CopyBudgets>,
) -> AppResult<Json<Value>> {
    let attempt = AuditEntry::new(AuditAction::BudgetsCopied, ResourceType::Budget)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        validate_month(&input.from_month)?;
        validate_month(&input.to_month)?;

        let target_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM budgets WHERE household_id = ? AND month = ?")
                .bind(&member.household_id)
                .bind(&input.to_month)
                .fetch_one(&pool)
                .await?;

        if target_count > 0 {
            return Err(AppError::Conflict(
                "El mes destino ya tiene presupuestos".to_string(),
            ));
        }

        let source: Vec<Budget> =
            sqlx::query_as("SELECT * FROM budgets WHERE household_id = ? AND month = ?")
                .bind(&member.household_id)
                .bind(&input.from_month)
                .fetch_all(&pool)
                .await?;

        let mut tx = pool.begin().await?;
        for budget in &source {
            sqlx::query(
                "INSERT INTO budgets (id, household_id, category_id, month, amount)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&member.household_id)
            .bind(&budget.category_id)
            .bind(&input.to_month)
            .bind(budget.amount)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        audit.log(
            AuditEntry::new(AuditAction::BudgetsCopied, ResourceType::Budget)
                .user(&member.user_id)
                .household(&member.household_id)
                .new_values(&json!({
                    "from_month": input.from_month,
                    "to_month": input.to_month,
                    "copied": source.len(),
                })),
        );

        Ok(Json(json!({ "copied": source.len() })))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
