use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Ledger movement kinds. Validation is dispatched on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "HOUSEHOLD")]
    Household,
    #[serde(rename = "SPLIT")]
    Split,
    #[serde(rename = "DEBT_PAYMENT")]
    DebtPayment,
}

impl MovementKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HOUSEHOLD" => Some(MovementKind::Household),
            "SPLIT" => Some(MovementKind::Split),
            "DEBT_PAYMENT" => Some(MovementKind::DebtPayment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Household => "HOUSEHOLD",
            MovementKind::Split => "SPLIT",
            MovementKind::DebtPayment => "DEBT_PAYMENT",
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One side of a movement: a registered household member or an external
/// contact. Flattened to the paired nullable columns at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Party {
    Member(String),
    External(String),
}

impl Party {
    /// Rebuild from the paired columns. `None` when neither is set; paired
    /// columns with both set never come from our writes and are rejected
    /// upstream, so the user id wins here.
    pub fn from_columns(user_id: Option<String>, contact_id: Option<String>) -> Option<Party> {
        match (user_id, contact_id) {
            (Some(u), _) => Some(Party::Member(u)),
            (None, Some(c)) => Some(Party::External(c)),
            (None, None) => None,
        }
    }

    pub fn into_columns(self) -> (Option<String>, Option<String>) {
        match self {
            Party::Member(u) => (Some(u), None),
            Party::External(c) => (None, Some(c)),
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Party::Member(_))
    }
}

/// Mutation qualifier for movements generated from a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationScope {
    This,
    Future,
    All,
}

impl MutationScope {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "this" | "THIS" => Some(MutationScope::This),
            "future" | "FUTURE" => Some(MutationScope::Future),
            "all" | "ALL" => Some(MutationScope::All),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Movement {
    pub id: String,
    pub household_id: String,
    pub movement_type: String,
    pub description: String,
    pub amount: f64,
    pub currency_code: String,
    pub category_id: Option<String>,
    /// Legacy shadow of the resolved category name, kept for backward reads.
    pub category_name: Option<String>,
    pub movement_date: String,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub generated_from_template_id: Option<String>,
    pub created_by_user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Movement {
    pub fn kind(&self) -> Option<MovementKind> {
        MovementKind::from_str(&self.movement_type)
    }

    pub fn payer(&self) -> Option<Party> {
        Party::from_columns(self.payer_user_id.clone(), self.payer_contact_id.clone())
    }

    pub fn counterparty(&self) -> Option<Party> {
        Party::from_columns(
            self.counterparty_user_id.clone(),
            self.counterparty_contact_id.clone(),
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MovementParticipant {
    pub id: String,
    pub movement_id: String,
    pub participant_user_id: Option<String>,
    pub participant_contact_id: Option<String>,
    pub percentage: f64,
}

impl MovementParticipant {
    pub fn party(&self) -> Option<Party> {
        Party::from_columns(
            self.participant_user_id.clone(),
            self.participant_contact_id.clone(),
        )
    }
}

/// Participant as it arrives in create/update payloads. Exactly one of
/// `user_id` / `contact_id` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParticipantInput {
    pub user_id: Option<String>,
    pub contact_id: Option<String>,
    pub percentage: f64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ParticipantWithName {
    pub id: String,
    pub participant_user_id: Option<String>,
    pub participant_contact_id: Option<String>,
    pub participant_name: String,
    pub percentage: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateMovement {
    pub movement_type: MovementKind,
    pub description: String,
    pub amount: f64,
    pub category_id: Option<String>,
    pub movement_date: Option<String>,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub participants: Option<Vec<ParticipantInput>>,
}

/// Sparse patch. `movement_type`, `household_id` and
/// `generated_from_template_id` are deliberately absent.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateMovement {
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub category_id: Option<String>,
    pub movement_date: Option<String>,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    pub counterparty_user_id: Option<String>,
    pub counterparty_contact_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub receiver_account_id: Option<String>,
    pub participants: Option<Vec<ParticipantInput>>,
}

impl UpdateMovement {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.amount.is_none()
            && self.category_id.is_none()
            && self.movement_date.is_none()
            && self.payer_user_id.is_none()
            && self.payer_contact_id.is_none()
            && self.counterparty_user_id.is_none()
            && self.counterparty_contact_id.is_none()
            && self.payment_method_id.is_none()
            && self.receiver_account_id.is_none()
            && self.participants.is_none()
    }
}

/// Movement enriched with resolved names so consumers need not join.
#[derive(Debug, Serialize)]
pub struct MovementWithDetails {
    #[serde(flatten)]
    pub movement: Movement,
    pub payer_name: Option<String>,
    pub counterparty_name: Option<String>,
    pub payment_method_name: Option<String>,
    pub receiver_account_name: Option<String>,
    pub participants: Vec<ParticipantWithName>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMovementsQuery {
    pub movement_type: Option<String>,
    /// YYYY-MM
    pub month: Option<String>,
    /// Matches payer or participant, member or contact id.
    pub member_id: Option<String>,
    pub category_id: Option<String>,
    pub payer_user_id: Option<String>,
    pub payer_contact_id: Option<String>,
    /// "expenses" hides the loan category; "debts" shows it.
    pub projection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConsolidateQuery {
    /// YYYY-MM
    pub month: Option<String>,
}
