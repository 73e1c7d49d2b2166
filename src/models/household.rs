use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Member = 0,
    Owner = 1,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Role::Member),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Owner => "owner",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub currency_code: String,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct MembershipRow {
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MemberResponse {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub joined_at: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HouseholdWithRole {
    pub id: String,
    pub name: String,
    pub currency_code: String,
    pub created_at: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateHousehold {
    pub name: String,
    pub currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateHousehold {
    pub name: Option<String>,
    pub currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMember {
    pub email: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRole {
    pub role: String,
}
