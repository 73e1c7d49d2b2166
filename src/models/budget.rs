use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Budget {
    pub id: String,
    pub household_id: String,
    pub category_id: String,
    /// YYYY-MM
    pub month: String,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpsertBudget {
    pub category_id: String,
    pub month: String,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct CopyBudgets {
    pub from_month: String,
    pub to_month: String,
}

/// Budget vs spent for one category in one month.
#[derive(Debug, Serialize)]
pub struct BudgetStatus {
    pub budget_id: String,
    pub category_id: String,
    pub category_name: String,
    pub month: String,
    pub budget_amount: f64,
    pub spent: f64,
    pub remaining: f64,
}
