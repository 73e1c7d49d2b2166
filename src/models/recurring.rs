use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::movement::{MovementKind, ParticipantInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrencePattern {
    #[serde(rename = "MONTHLY")]
    Monthly,
    #[serde(rename = "YEARLY")]
    Yearly,
    #[serde(rename = "ONE_TIME")]
    OneTime,
}

impl RecurrencePattern {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MONTHLY" => Some(RecurrencePattern::Monthly),
            "YEARLY" => Some(RecurrencePattern::Yearly),
            "ONE_TIME" => Some(RecurrencePattern::OneTime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Monthly => "MONTHLY",
            RecurrencePattern::Yearly => "YEARLY",
            RecurrencePattern::OneTime => "ONE_TIME",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RecurringTemplate {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category_id: String,
    pub movement_type: String,
    pub amount: f64,
    pub currency_code: String,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub auto_generate: bool,
    pub recurrence_pattern: String,
    pub day_of_month: Option<i64>,
    pub month_of_year: Option<i64>,
    pub start_date: String,
    pub end_date: Option<String>,
    pub last_generated_date: Option<String>,
    pub next_scheduled_date: String,
    pub is_active: bool,
    pub created_at: String,
}

impl RecurringTemplate {
    pub fn kind(&self) -> Option<MovementKind> {
        MovementKind::from_str(&self.movement_type)
    }

    pub fn pattern(&self) -> Option<RecurrencePattern> {
        RecurrencePattern::from_str(&self.recurrence_pattern)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RecurringTemplateParticipant {
    pub id: String,
    pub template_id: String,
    pub participant_user_id: Option<String>,
    pub participant_contact_id: Option<String>,
    pub percentage: f64,
}

/// Legacy payloads still carrying the removed amount_type field are rejected
/// outright by `deny_unknown_fields`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTemplate {
    pub name: String,
    pub description: Option<String>,
    pub category_id: String,
    pub movement_type: MovementKind,
    pub amount: f64,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub auto_generate: Option<bool>,
    pub recurrence_pattern: RecurrencePattern,
    pub day_of_month: Option<i64>,
    pub month_of_year: Option<i64>,
    pub start_date: String,
    pub end_date: Option<String>,
    pub participants: Option<Vec<ParticipantInput>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTemplate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub amount: Option<f64>,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub auto_generate: Option<bool>,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub day_of_month: Option<i64>,
    pub month_of_year: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_active: Option<bool>,
    pub participants: Option<Vec<ParticipantInput>>,
}

#[derive(Debug, Serialize)]
pub struct TemplateWithParticipants {
    #[serde(flatten)]
    pub template: RecurringTemplate,
    pub participants: Vec<RecurringTemplateParticipant>,
}

/// Compact entry for the templates-by-category bundle in the movement form
/// config.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub auto_generate: bool,
    pub day_of_month: Option<i64>,
}

/// Pre-fill payload matching the movement create input shape. Never
/// materializes anything.
#[derive(Debug, Serialize)]
pub struct MovementPrefill {
    pub movement_type: MovementKind,
    pub description: String,
    pub amount: f64,
    pub currency_code: String,
    pub category_id: Option<String>,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub participants: Vec<ParticipantInput>,
    pub role_inversion_applied: bool,
}

#[derive(Debug, Deserialize)]
pub struct PrefillQuery {
    pub invert_roles: Option<bool>,
}
