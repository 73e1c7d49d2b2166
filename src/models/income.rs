use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Income {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub description: String,
    pub amount: f64,
    pub income_date: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateIncome {
    pub description: String,
    pub amount: f64,
    pub income_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateIncome {
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub income_date: Option<String>,
}
