use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ACCOUNT_TYPES: &[&str] = &["savings", "checking", "cash", "investment", "other"];

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: String,
    pub household_id: String,
    pub owner_user_id: String,
    pub name: String,
    pub account_type: String,
    pub institution: Option<String>,
    pub last4: Option<String>,
    pub initial_balance: f64,
    /// initial_balance plus the signed postings from movements. Maintained by
    /// the movement engine, never written directly by handlers.
    pub current_balance: f64,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    pub account_type: String,
    pub institution: Option<String>,
    pub last4: Option<String>,
    pub initial_balance: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccount {
    pub name: Option<String>,
    pub account_type: Option<String>,
    pub institution: Option<String>,
    pub last4: Option<String>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}
