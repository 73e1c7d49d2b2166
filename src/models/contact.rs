use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A household-local reference to an external person. When `linked_user_id`
/// is set the contact is this household's view of a registered user, which
/// enables cross-household debt visibility.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Contact {
    pub id: String,
    pub household_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linked_user_id: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateContact {
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linked_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContact {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linked_user_id: Option<String>,
    pub is_active: Option<bool>,
}
