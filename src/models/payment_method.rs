use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const PAYMENT_METHOD_TYPES: &[&str] =
    &["debit_card", "credit_card", "cash", "bank_transfer", "other"];

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentMethod {
    pub id: String,
    pub household_id: String,
    pub owner_user_id: String,
    pub name: String,
    pub method_type: String,
    pub institution: Option<String>,
    pub last4: Option<String>,
    pub is_shared_with_household: bool,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentMethod {
    pub name: String,
    pub method_type: String,
    pub institution: Option<String>,
    pub last4: Option<String>,
    pub is_shared_with_household: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentMethod {
    pub name: Option<String>,
    pub method_type: Option<String>,
    pub institution: Option<String>,
    pub last4: Option<String>,
    pub is_shared_with_household: Option<bool>,
    pub is_active: Option<bool>,
}
