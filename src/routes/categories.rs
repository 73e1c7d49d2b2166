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
        AuditAction, AuditEntry, Category, CategoryGroup, CreateCategory, CreateCategoryGroup,
        ResourceType, UpdateCategory, UpdateCategoryGroup,
    },
    services::audit::AuditHandle,
    AppState,
};

pub fn groups_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route("/{group_id}", axum::routing::patch(update_group).delete(delete_group))
}

pub fn categories_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories).post(create_category))
        .route(
            "/{category_id}",
            axum::routing::patch(update_category).delete(delete_category),
        )
}

async fn list_groups(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<CategoryGroup>>> {
    let groups: Vec<CategoryGroup> = sqlx::query_as(
        "SELECT * FROM category_groups WHERE household_id = ?
         ORDER BY display_order ASC, name ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(groups))
}

async fn create_group(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateCategoryGroup>,
) -> AppResult<(StatusCode, Json<CategoryGroup>)> {
    let attempt = AuditEntry::new(AuditAction::CategoryGroupCreated, ResourceType::CategoryGroup)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        let group_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO category_groups (id, household_id, name, icon, display_order)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&group_id)
        .bind(&member.household_id)
        .bind(name)
        .bind(&input.icon)
        .bind(input.display_order.unwrap_or(0))
        .execute(&pool)
        .await?;

        let group: CategoryGroup = sqlx::query_as("SELECT * FROM category_groups WHERE id = ?")
            .bind(&group_id)
            .fetch_one(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::CategoryGroupCreated, ResourceType::CategoryGroup)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&group_id)
                .new_values(&group),
        );

        Ok((StatusCode::CREATED, Json(group)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_group(
    Path(group_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateCategoryGroup>,
) -> AppResult<Json<CategoryGroup>> {
    let attempt = AuditEntry::new(AuditAction::CategoryGroupUpdated, ResourceType::CategoryGroup)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old: Option<CategoryGroup> =
            sqlx::query_as("SELECT * FROM category_groups WHERE id = ? AND household_id = ?")
                .bind(&group_id)
                .bind(&member.household_id)
                .fetch_optional(&pool)
                .await?;
        let old = old.ok_or_else(|| AppError::NotFound("Grupo no encontrado".to_string()))?;

        let name = input.name.unwrap_or_else(|| old.name.clone());
        if name.trim().is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        sqlx::query("UPDATE category_groups SET name = ?, icon = ?, display_order = ? WHERE id = ?")
            .bind(name.trim())
            .bind(input.icon.or_else(|| old.icon.clone()))
            .bind(input.display_order.unwrap_or(old.display_order))
            .bind(&group_id)
            .execute(&pool)
            .await?;

        let updated: CategoryGroup = sqlx::query_as("SELECT * FROM category_groups WHERE id = ?")
            .bind(&group_id)
            .fetch_one(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::CategoryGroupUpdated, ResourceType::CategoryGroup)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&group_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_group(
    Path(group_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::CategoryGroupDeleted, ResourceType::CategoryGroup)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old: Option<CategoryGroup> =
            sqlx::query_as("SELECT * FROM category_groups WHERE id = ? AND household_id = ?")
                .bind(&group_id)
                .bind(&member.household_id)
                .fetch_optional(&pool)
                .await?;
        let old = old.ok_or_else(|| AppError::NotFound("Grupo no encontrado".to_string()))?;

        let categories: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE category_group_id = ?")
                .bind(&group_id)
                .fetch_one(&pool)
                .await?;

        if categories > 0 {
            return Err(AppError::Conflict(
                "El grupo todavía tiene categorías".to_string(),
            ));
        }

        sqlx::query("DELETE FROM category_groups WHERE id = ?")
            .bind(&group_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::CategoryGroupDeleted, ResourceType::CategoryGroup)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&group_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn fetch_category(
    pool: &SqlitePool,
    household_id: &str,
    category_id: &str,
) -> AppResult<Category> {
    let category: Option<Category> =
        sqlx::query_as("SELECT * FROM categories WHERE id = ? AND household_id = ?")
            .bind(category_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    category.ok_or_else(|| AppError::NotFound("Categoría no encontrada".to_string()))
}

async fn list_categories(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Category>>> {
    let categories: Vec<Category> =
        sqlx::query_as("SELECT * FROM categories WHERE household_id = ? ORDER BY name ASC")
            .bind(&member.household_id)
            .fetch_all(&pool)
            .await?;

    Ok(Json(categories))
}

async fn create_category(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateCategory>,
) -> AppResult<(StatusCode, Json<Category>)> {
    let attempt = AuditEntry::new(AuditAction::CategoryCreated, ResourceType::Category)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        let group: Option<String> =
            sqlx::query_scalar("SELECT id FROM category_groups WHERE id = ? AND household_id = ?")
                .bind(&input.category_group_id)
                .bind(&member.household_id)
                .fetch_optional(&pool)
                .await?;
        if group.is_none() {
            return Err(AppError::NotFound("Grupo no encontrado".to_string()));
        }

        let duplicate: Option<String> = sqlx::query_scalar(
            "SELECT id FROM categories WHERE household_id = ? AND name = ? AND is_active = 1",
        )
        .bind(&member.household_id)
        .bind(name)
        .fetch_optional(&pool)
        .await?;
        if duplicate.is_some() {
            return Err(AppError::Conflict(
                "Ya existe una categoría con ese nombre".to_string(),
            ));
        }

        let category_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO categories (id, household_id, category_group_id, name, icon, color)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&category_id)
        .bind(&member.household_id)
        .bind(&input.category_group_id)
        .bind(name)
        .bind(&input.icon)
        .bind(&input.color)
        .execute(&pool)
        .await?;

        let category = fetch_category(&pool, &member.household_id, &category_id).await?;

        audit.log(
            AuditEntry::new(AuditAction::CategoryCreated, ResourceType::Category)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&category_id)
                .new_values(&category),
        );

        Ok((StatusCode::CREATED, Json(category)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn update_category(
    Path(category_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateCategory>,
) -> AppResult<Json<Category>> {
    let attempt = AuditEntry::new(AuditAction::CategoryUpdated, ResourceType::Category)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_category(&pool, &member.household_id, &category_id).await?;

        let name = input.name.unwrap_or_else(|| old.name.clone());
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        if name != old.name {
            let duplicate: Option<String> = sqlx::query_scalar(
                "SELECT id FROM categories
                 WHERE household_id = ? AND name = ? AND is_active = 1 AND id != ?",
            )
            .bind(&member.household_id)
            .bind(&name)
            .bind(&category_id)
            .fetch_optional(&pool)
            .await?;
            if duplicate.is_some() {
                return Err(AppError::Conflict(
                    "Ya existe una categoría con ese nombre".to_string(),
                ));
            }
        }

        let group_id = input
            .category_group_id
            .unwrap_or_else(|| old.category_group_id.clone());
        if group_id != old.category_group_id {
            let group: Option<String> =
                sqlx::query_scalar("SELECT id FROM category_groups WHERE id = ? AND household_id = ?")
                    .bind(&group_id)
                    .bind(&member.household_id)
                    .fetch_optional(&pool)
                    .await?;
            if group.is_none() {
                return Err(AppError::NotFound("Grupo no encontrado".to_string()));
            }
        }

        let is_active = input.is_active.unwrap_or(old.is_active);

        sqlx::query(
            "UPDATE categories SET category_group_id = ?, name = ?, icon = ?, color = ?,
                is_active = ? WHERE id = ?",
        )
        .bind(&group_id)
        .bind(&name)
        .bind(input.icon.or_else(|| old.icon.clone()))
        .bind(input.color.or_else(|| old.color.clone()))
        .bind(is_active)
        .bind(&category_id)
        .execute(&pool)
        .await?;

        let updated = fetch_category(&pool, &member.household_id, &category_id).await?;

        let action = if old.is_active != updated.is_active {
            if updated.is_active {
                AuditAction::CategoryActivated
            } else {
                AuditAction::CategoryDeactivated
            }
        } else {
            AuditAction::CategoryUpdated
        };

        audit.log(
            AuditEntry::new(action, ResourceType::Category)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&category_id)
                .old(&old)
                .new_values(&updated),
        );

        Ok(Json(updated))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_category(
    Path(category_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<StatusCode> {
    let attempt = AuditEntry::new(AuditAction::CategoryDeleted, ResourceType::Category)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = fetch_category(&pool, &member.household_id, &category_id).await?;

        let referenced: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM movements WHERE category_id = ?)
                  + (SELECT COUNT(*) FROM recurring_templates WHERE category_id = ?)",
        )
        .bind(&category_id)
        .bind(&category_id)
        .fetch_one(&pool)
        .await?;

        if referenced > 0 {
            return Err(AppError::Conflict(
                "La categoría todavía tiene movimientos; desactívala en su lugar".to_string(),
            ));
        }

        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(&category_id)
            .execute(&pool)
            .await?;

        audit.log(
            AuditEntry::new(AuditAction::CategoryDeleted, ResourceType::Category)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&category_id)
                .old(&old),
        );

        Ok(StatusCode::NO_CONTENT)
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
