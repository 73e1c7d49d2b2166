use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    auth::HouseholdMember,
    error::AppResult,
    models::{
        Category, CategoryGroup, CategoryGroupWithCategories, ConsolidateQuery, Contact,
        CreateMovement, ListMovementsQuery, MemberResponse, MovementWithDetails, ScopeQuery,
        TemplateSummary, UpdateMovement,
    },
    services::audit::AuditHandle,
    services::debt_consolidator::{self, ConsolidatedDebts},
    services::movements,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_movements).post(create_movement))
        .route("/debts/consolidate", get(consolidate_debts))
        .route(
            "/{movement_id}",
            get(get_movement).patch(update_movement).delete(delete_movement),
        )
}

pub fn form_config_router() -> Router<AppState> {
    Router::new().route("/", get(movement_form_config))
}

async fn list_movements(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    Query(query): Query<ListMovementsQuery>,
) -> AppResult<Json<Vec<MovementWithDetails>>> {
    let result = movements::list_movements(&pool, &member, &query).await?;
    Ok(Json(result))
}

async fn get_movement(
    Path(movement_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<MovementWithDetails>> {
    let result = movements::get_movement(&pool, &member, &movement_id).await?;
    Ok(Json(result))
}

async fn create_movement(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateMovement>,
) -> AppResult<(StatusCode, Json<MovementWithDetails>)> {
    let result = movements::create_movement(&pool, &audit, &member, input).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn update_movement(
    Path(movement_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Query(scope): Query<ScopeQuery>,
    Json(patch): Json<UpdateMovement>,
) -> AppResult<Json<MovementWithDetails>> {
    let result =
        movements::update_movement(&pool, &audit, &member, &movement_id, &scope.scope, patch)
            .await?;
    Ok(Json(result))
}

async fn delete_movement(
    Path(movement_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Query(scope): Query<ScopeQuery>,
) -> AppResult<StatusCode> {
    movements::delete_movement(&pool, &audit, &member, &movement_id, &scope.scope).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn consolidate_debts(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    Query(query): Query<ConsolidateQuery>,
) -> AppResult<Json<ConsolidatedDebts>> {
    let result = debt_consolidator::consolidate(&pool, &member, query.month).await?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
struct TemplatesByCategory {
    category_id: String,
    templates: Vec<TemplateSummary>,
}

/// Everything the movement entry form needs in one response, so clients
/// avoid a query per category.
#[derive(Debug, Serialize)]
struct MovementFormConfig {
    members: Vec<MemberResponse>,
    contacts: Vec<Contact>,
    category_groups: Vec<CategoryGroupWithCategories>,
    accounts: Vec<crate::models::Account>,
    payment_methods: Vec<crate::models::PaymentMethod>,
    templates_by_category: Vec<TemplatesByCategory>,
}

async fn movement_form_config(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<MovementFormConfig>> {
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

    let contacts: Vec<Contact> = sqlx::query_as(
        "SELECT * FROM contacts WHERE household_id = ? AND is_active = 1 ORDER BY display_name",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    let groups: Vec<CategoryGroup> = sqlx::query_as(
        "SELECT * FROM category_groups WHERE household_id = ?
         ORDER BY display_order ASC, name ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    let mut category_groups = Vec::with_capacity(groups.len());
    for group in groups {
        let categories: Vec<Category> = sqlx::query_as(
            "SELECT * FROM categories
             WHERE category_group_id = ? AND is_active = 1 ORDER BY name ASC",
        )
        .bind(&group.id)
        .fetch_all(&pool)
        .await?;
        category_groups.push(CategoryGroupWithCategories { group, categories });
    }

    let accounts: Vec<crate::models::Account> = sqlx::query_as(
        "SELECT * FROM accounts WHERE household_id = ? AND is_active = 1 ORDER BY name ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    let payment_methods: Vec<crate::models::PaymentMethod> = sqlx::query_as(
        "SELECT * FROM payment_methods
         WHERE household_id = ? AND is_active = 1
           AND (is_shared_with_household = 1 OR owner_user_id = ?)
         ORDER BY name ASC",
    )
    .bind(&member.household_id)
    .bind(&member.user_id)
    .fetch_all(&pool)
    .await?;

    // Templates bundled per category so the form pre-fills without N queries
    let bundle: Vec<(String, String, String, f64, bool, Option<i64>)> = sqlx::query_as(
        "SELECT category_id, id, name, amount, auto_generate, day_of_month
         FROM recurring_templates
         WHERE household_id = ? AND is_active = 1
         ORDER BY category_id ASC, name ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    let mut templates_by_category: Vec<TemplatesByCategory> = Vec::new();
    for (category_id, id, name, amount, auto_generate, day_of_month) in bundle {
        let summary = TemplateSummary {
            id,
            name,
            amount,
            auto_generate,
            day_of_month,
        };
        match templates_by_category
            .last_mut()
            .filter(|entry| entry.category_id == category_id)
        {
            Some(entry) => entry.templates.push(summary),
            None => templates_by_category.push(TemplatesByCategory {
                category_id,
                templates: vec![summary],
            }),
        }
    }

    Ok(Json(MovementFormConfig {
        members,
        contacts,
        category_groups,
        accounts,
        payment_methods,
        templates_by_category,
    }))
}
