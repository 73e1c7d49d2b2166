use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Resource families named in audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    User,
    Session,
    Household,
    Membership,
    Contact,
    Account,
    PaymentMethod,
    CategoryGroup,
    Category,
    Budget,
    Income,
    Movement,
    RecurringTemplate,
    AuditLog,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "user",
            ResourceType::Session => "session",
            ResourceType::Household => "household",
            ResourceType::Membership => "membership",
            ResourceType::Contact => "contact",
            ResourceType::Account => "account",
            ResourceType::PaymentMethod => "payment_method",
            ResourceType::CategoryGroup => "category_group",
            ResourceType::Category => "category",
            ResourceType::Budget => "budget",
            ResourceType::Income => "income",
            ResourceType::Movement => "movement",
            ResourceType::RecurringTemplate => "recurring_template",
            ResourceType::AuditLog => "audit_log",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every mutation verb × resource the system audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    // Users & sessions
    UserRegistered,
    UserLoggedIn,
    UserLoginFailed,
    UserLoggedOut,
    UserUpdated,
    UserEmailChanged,
    UserDeleted,
    PasswordResetRequested,
    PasswordResetCompleted,
    // Households & memberships
    HouseholdCreated,
    HouseholdUpdated,
    HouseholdDeleted,
    MemberAdded,
    MemberRoleUpdated,
    MemberRemoved,
    MemberLeft,
    OwnershipTransferred,
    // Contacts
    ContactCreated,
    ContactUpdated,
    ContactDeleted,
    ContactLinked,
    ContactUnlinked,
    ContactPromoted,
    ContactActivated,
    ContactDeactivated,
    // Accounts
    AccountCreated,
    AccountUpdated,
    AccountDeleted,
    AccountActivated,
    AccountDeactivated,
    // Payment methods
    PaymentMethodCreated,
    PaymentMethodUpdated,
    PaymentMethodDeleted,
    PaymentMethodActivated,
    PaymentMethodDeactivated,
    // Category groups & categories
    CategoryGroupCreated,
    CategoryGroupUpdated,
    CategoryGroupDeleted,
    CategoryCreated,
    CategoryUpdated,
    CategoryDeleted,
    CategoryActivated,
    CategoryDeactivated,
    // Budgets & incomes
    BudgetUpserted,
    BudgetDeleted,
    BudgetsCopied,
    IncomeCreated,
    IncomeUpdated,
    IncomeDeleted,
    // Movements
    MovementCreated,
    MovementUpdated,
    MovementDeleted,
    MovementAutoGenerated,
    MovementParticipantsReplaced,
    // Recurring templates
    TemplateCreated,
    TemplateUpdated,
    TemplateDeleted,
    TemplateDeactivated,
    TemplateScheduleUpdated,
    TemplateGenerationRun,
    // Audit administration
    AuditLogsPurged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegistered => "USER_REGISTERED",
            AuditAction::UserLoggedIn => "USER_LOGGED_IN",
            AuditAction::UserLoginFailed => "USER_LOGIN_FAILED",
            AuditAction::UserLoggedOut => "USER_LOGGED_OUT",
            AuditAction::UserUpdated => "USER_UPDATED",
            AuditAction::UserEmailChanged => "USER_EMAIL_CHANGED",
            AuditAction::UserDeleted => "USER_DELETED",
            AuditAction::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            AuditAction::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
            AuditAction::HouseholdCreated => "HOUSEHOLD_CREATED",
            AuditAction::HouseholdUpdated => "HOUSEHOLD_UPDATED",
            AuditAction::HouseholdDeleted => "HOUSEHOLD_DELETED",
            AuditAction::MemberAdded => "MEMBER_ADDED",
            AuditAction::MemberRoleUpdated => "MEMBER_ROLE_UPDATED",
            AuditAction::MemberRemoved => "MEMBER_REMOVED",
            AuditAction::MemberLeft => "MEMBER_LEFT",
            AuditAction::OwnershipTransferred => "OWNERSHIP_TRANSFERRED",
            AuditAction::ContactCreated => "CONTACT_CREATED",
            AuditAction::ContactUpdated => "CONTACT_UPDATED",
            AuditAction::ContactDeleted => "CONTACT_DELETED",
            AuditAction::ContactLinked => "CONTACT_LINKED",
            AuditAction::ContactUnlinked => "CONTACT_UNLINKED",
            AuditAction::ContactPromoted => "CONTACT_PROMOTED",
            AuditAction::ContactActivated => "CONTACT_ACTIVATED",
            AuditAction::ContactDeactivated => "CONTACT_DEACTIVATED",
            AuditAction::AccountCreated => "ACCOUNT_CREATED",
            AuditAction::AccountUpdated => "ACCOUNT_UPDATED",
            AuditAction::AccountDeleted => "ACCOUNT_DELETED",
            AuditAction::AccountActivated => "ACCOUNT_ACTIVATED",
            AuditAction::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            AuditAction::PaymentMethodCreated => "PAYMENT_METHOD_CREATED",
            AuditAction::PaymentMethodUpdated => "PAYMENT_METHOD_UPDATED",
            AuditAction::PaymentMethodDeleted => "PAYMENT_METHOD_DELETED",
            AuditAction::PaymentMethodActivated => "PAYMENT_METHOD_ACTIVATED",
            AuditAction::PaymentMethodDeactivated => "PAYMENT_METHOD_DEACTIVATED",
            AuditAction::CategoryGroupCreated => "CATEGORY_GROUP_CREATED",
            AuditAction::CategoryGroupUpdated => "CATEGORY_GROUP_UPDATED",
            AuditAction::CategoryGroupDeleted => "CATEGORY_GROUP_DELETED",
            AuditAction::CategoryCreated => "CATEGORY_CREATED",
            AuditAction::CategoryUpdated => "CATEGORY_UPDATED",
            AuditAction::CategoryDeleted => "CATEGORY_DELETED",
            AuditAction::CategoryActivated => "CATEGORY_ACTIVATED",
            AuditAction::CategoryDeactivated => "CATEGORY_DEACTIVATED",
            AuditAction::BudgetUpserted => "BUDGET_UPSERTED",
            AuditAction::BudgetDeleted => "BUDGET_DELETED",
            AuditAction::BudgetsCopied => "BUDGETS_COPIED",
            AuditAction::IncomeCreated => "INCOME_CREATED",
            AuditAction::IncomeUpdated => "INCOME_UPDATED",
            AuditAction::IncomeDeleted => "INCOME_DELETED",
            AuditAction::MovementCreated => "MOVEMENT_CREATED",
            AuditAction::MovementUpdated => "MOVEMENT_UPDATED",
            AuditAction::MovementDeleted => "MOVEMENT_DELETED",
            AuditAction::MovementAutoGenerated => "MOVEMENT_AUTO_GENERATED",
            AuditAction::MovementParticipantsReplaced => "MOVEMENT_PARTICIPANTS_REPLACED",
            AuditAction::TemplateCreated => "TEMPLATE_CREATED",
            AuditAction::TemplateUpdated => "TEMPLATE_UPDATED",
            AuditAction::TemplateDeleted => "TEMPLATE_DELETED",
            AuditAction::TemplateDeactivated => "TEMPLATE_DEACTIVATED",
            AuditAction::TemplateScheduleUpdated => "TEMPLATE_SCHEDULE_UPDATED",
            AuditAction::TemplateGenerationRun => "TEMPLATE_GENERATION_RUN",
            AuditAction::AuditLogsPurged => "AUDIT_LOGS_PURGED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One mutation attempt, as queued by producers.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Option<String>,
    pub household_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, resource_type: ResourceType) -> Self {
        Self {
            user_id: None,
            household_id: None,
            action,
            resource_type,
            resource_id: None,
            old_values: None,
            new_values: None,
            success: true,
            error_message: None,
            ip: None,
            user_agent: None,
        }
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn household(mut self, household_id: &str) -> Self {
        self.household_id = Some(household_id.to_string());
        self
    }

    pub fn resource(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn old<T: Serialize>(mut self, value: &T) -> Self {
        self.old_values = serde_json::to_value(value).ok();
        self
    }

    pub fn new_values<T: Serialize>(mut self, value: &T) -> Self {
        self.new_values = serde_json::to_value(value).ok();
        self
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.success = false;
        self.error_message = Some(message.to_string());
        self
    }
}

/// Raw audit row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogRow {
    pub id: String,
    pub created_at: String,
    pub user_id: Option<String>,
    pub household_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_values: Option<String>,
    pub new_values: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Audit row with payloads parsed back into JSON for responses.
#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub id: String,
    pub created_at: String,
    pub user_id: Option<String>,
    pub household_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<AuditLogRow> for AuditLogResponse {
    fn from(row: AuditLogRow) -> Self {
        AuditLogResponse {
            id: row.id,
            created_at: row.created_at,
            user_id: row.user_id,
            household_id: row.household_id,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            old_values: row.old_values.and_then(|s| serde_json::from_str(&s).ok()),
            new_values: row.new_values.and_then(|s| serde_json::from_str(&s).ok()),
            success: row.success,
            error_message: row.error_message,
            ip: row.ip,
            user_agent: row.user_agent,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub household_id: Option<String>,
    pub user_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
