use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Category reserved for loans between parties. Hidden from the expenses
/// projection, visible in the debts projection.
pub const LOAN_CATEGORY_NAME: &str = "Préstamo";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CategoryGroup {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub display_order: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Category {
    pub id: String,
    pub household_id: String,
    pub category_group_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryGroup {
    pub name: String,
    pub icon: Option<String>,
    pub display_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryGroup {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub display_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategory {
    pub category_group_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategory {
    pub category_group_id: Option<String>,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub is_active: Option<bool>,
}

/// Group with its categories, as served by the movement form config.
#[derive(Debug, Serialize)]
pub struct CategoryGroupWithCategories {
    #[serde(flatten)]
    pub group: CategoryGroup,
    pub categories: Vec<Category>,
}
