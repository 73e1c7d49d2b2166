use std::collections::HashSet;

use rust_decimal::{prelude::*, Decimal, RoundingStrategy};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::auth::HouseholdMember;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuditAction, AuditEntry, CreateMovement, ListMovementsQuery, Movement, MovementKind,
    MovementWithDetails, MutationScope, ParticipantInput, ParticipantWithName, Party,
    ResourceType, UpdateMovement, LOAN_CATEGORY_NAME,
};
use crate::services::audit::AuditHandle;
use crate::services::schedule;

/// Participant percentages must sum to 1 within this tolerance.
pub const PERCENTAGE_TOLERANCE: f64 = 1e-4;

fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Round half-even to cents. Amounts arrive as JSON numbers and may carry
/// more than two decimals.
pub fn round_money(amount: f64) -> f64 {
    Decimal::from_f64_retain(amount)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(amount)
}

pub fn validate_amount(amount: f64) -> AppResult<f64> {
    let rounded = round_money(amount);
    if rounded <= 0.0 {
        return Err(AppError::BalanceInvariant(
            "El monto debe ser mayor a 0".to_string(),
        ));
    }
    Ok(rounded)
}

async fn is_household_member(
    pool: &SqlitePool,
    household_id: &str,
    user_id: &str,
) -> AppResult<bool> {
    let found: Option<String> = sqlx::query_scalar(
        "SELECT user_id FROM household_members WHERE household_id = ? AND user_id = ?",
    )
    .bind(household_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

async fn contact_in_household(
    pool: &SqlitePool,
    household_id: &str,
    contact_id: &str,
) -> AppResult<bool> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT id FROM contacts WHERE id = ? AND household_id = ?")
            .bind(contact_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Resolve the paired id columns into a [`Party`], verifying the referenced
/// person belongs to the household. Returns `None` when neither id is given.
pub(crate) async fn resolve_party(
    pool: &SqlitePool,
    household_id: &str,
    user_id: &Option<String>,
    contact_id: &Option<String>,
    label: &str,
) -> AppResult<Option<Party>> {
    match (user_id, contact_id) {
        (Some(_), Some(_)) => Err(AppError::Validation(format!(
            "Indica un solo {} (miembro o contacto)",
            label
        ))),
        (Some(user_id), None) => {
            if !is_household_member(pool, household_id, user_id).await? {
                return Err(AppError::NotFound(format!(
                    "El {} no es miembro del hogar",
                    label
                )));
            }
            Ok(Some(Party::Member(user_id.clone())))
        }
        (None, Some(contact_id)) => {
            if !contact_in_household(pool, household_id, contact_id).await? {
                return Err(AppError::NotFound(format!(
                    "El contacto indicado como {} no pertenece al hogar",
                    label
                )));
            }
            Ok(Some(Party::External(contact_id.clone())))
        }
        (None, None) => Ok(None),
    }
}

pub(crate) async fn validate_participants(
    pool: &SqlitePool,
    household_id: &str,
    participants: &[ParticipantInput],
) -> AppResult<()> {
    if participants.is_empty() {
        return Err(AppError::Validation(
            "Agrega al menos un participante".to_string(),
        ));
    }

    let mut seen: HashSet<(bool, String)> = HashSet::new();
    let mut sum = 0.0;

    for p in participants {
        let party = resolve_party(pool, household_id, &p.user_id, &p.contact_id, "participante")
            .await?
            .ok_or_else(|| {
                AppError::Validation("Cada participante debe ser miembro o contacto".to_string())
            })?;

        let key = match &party {
            Party::Member(id) => (true, id.clone()),
            Party::External(id) => (false, id.clone()),
        };
        if !seen.insert(key) {
            return Err(AppError::Validation(
                "Hay participantes repetidos".to_string(),
            ));
        }

        if p.percentage <= 0.0 || p.percentage > 1.0 {
            return Err(AppError::BalanceInvariant(
                "Cada porcentaje debe estar entre 0 y 1".to_string(),
            ));
        }
        sum += p.percentage;
    }

    if (sum - 1.0).abs() > PERCENTAGE_TOLERANCE {
        return Err(AppError::BalanceInvariant(
            "Los porcentajes deben sumar 100%".to_string(),
        ));
    }

    Ok(())
}

pub(crate) async fn category_name(
    pool: &SqlitePool,
    household_id: &str,
    category_id: &str,
) -> AppResult<String> {
    sqlx::query_scalar("SELECT name FROM categories WHERE id = ? AND household_id = ?")
        .bind(category_id)
        .bind(household_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Categoría no encontrada".to_string()))
}

pub(crate) async fn payment_method_exists(
    pool: &SqlitePool,
    household_id: &str,
    payment_method_id: &str,
) -> AppResult<()> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT id FROM payment_methods WHERE id = ? AND household_id = ?")
            .bind(payment_method_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Medio de pago no encontrado".to_string()))
}

pub(crate) async fn account_exists(
    pool: &SqlitePool,
    household_id: &str,
    account_id: &str,
) -> AppResult<()> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT id FROM accounts WHERE id = ? AND household_id = ?")
            .bind(account_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Cuenta no encontrada".to_string()))
}

/// The field combination a movement (or template) proposes. Validation is
/// dispatched on the kind tag.
pub(crate) struct MovementShape<'a> {
    pub kind: MovementKind,
    pub payer_user_id: &'a Option<String>,
    pub payer_contact_id: &'a Option<String>,
    pub counterparty_user_id: &'a Option<String>,
    pub counterparty_contact_id: &'a Option<String>,
    pub category_id: &'a Option<String>,
    pub payment_method_id: &'a Option<String>,
    pub receiver_account_id: &'a Option<String>,
    pub participants: Option<&'a [ParticipantInput]>,
}

pub(crate) async fn validate_shape(
    pool: &SqlitePool,
    household_id: &str,
    shape: &MovementShape<'_>,
) -> AppResult<()> {
    let payer = resolve_party(
        pool,
        household_id,
        shape.payer_user_id,
        shape.payer_contact_id,
        "pagador",
    )
    .await?;

    let counterparty = resolve_party(
        pool,
        household_id,
        shape.counterparty_user_id,
        shape.counterparty_contact_id,
        "contraparte",
    )
    .await?;

    if let Some(category_id) = shape.category_id {
        category_name(pool, household_id, category_id).await?;
    }
    if let Some(payment_method_id) = shape.payment_method_id {
        payment_method_exists(pool, household_id, payment_method_id).await?;
    }
    if let Some(account_id) = shape.receiver_account_id {
        account_exists(pool, household_id, account_id).await?;
    }

    match shape.kind {
        MovementKind::Household => {
            if counterparty.is_some() {
                return Err(AppError::Validation(
                    "Un gasto del hogar no lleva contraparte".to_string(),
                ));
            }
            if shape.participants.is_some_and(|p| !p.is_empty()) {
                return Err(AppError::Validation(
                    "Un gasto del hogar no lleva participantes".to_string(),
                ));
            }
            if shape.category_id.is_none() {
                return Err(AppError::Validation(
                    "La categoría es obligatoria".to_string(),
                ));
            }
            if shape.payment_method_id.is_none() {
                return Err(AppError::Dependency(
                    "El medio de pago es obligatorio".to_string(),
                ));
            }
        }
        MovementKind::Split => {
            let payer = payer.ok_or_else(|| {
                AppError::Validation("El pagador es obligatorio".to_string())
            })?;
            if counterparty.is_some() {
                return Err(AppError::Validation(
                    "Un gasto compartido no lleva contraparte".to_string(),
                ));
            }
            if shape.category_id.is_none() {
                return Err(AppError::Validation(
                    "La categoría es obligatoria".to_string(),
                ));
            }
            let participants = shape.participants.unwrap_or_default();
            validate_participants(pool, household_id, participants).await?;
            // A contact payer settles outside our books, so the payment
            // method may be omitted
            if payer.is_member() && shape.payment_method_id.is_none() {
                return Err(AppError::Dependency(
                    "El medio de pago es obligatorio".to_string(),
                ));
            }
        }
        MovementKind::DebtPayment => {
            let payer = payer.ok_or_else(|| {
                AppError::Validation("El pagador es obligatorio".to_string())
            })?;
            let counterparty = counterparty.ok_or_else(|| {
                AppError::Validation("La contraparte es obligatoria".to_string())
            })?;
            if payer == counterparty {
                return Err(AppError::Validation(
                    "El pagador y la contraparte deben ser distintos".to_string(),
                ));
            }
            if shape.participants.is_some_and(|p| !p.is_empty()) {
                return Err(AppError::Validation(
                    "Un pago de deuda no lleva participantes".to_string(),
                ));
            }
            if payer.is_member() && shape.payment_method_id.is_none() {
                return Err(AppError::Dependency(
                    "El medio de pago es obligatorio".to_string(),
                ));
            }
            if counterparty.is_member() && shape.receiver_account_id.is_none() {
                return Err(AppError::Dependency(
                    "La cuenta receptora es obligatoria".to_string(),
                ));
            }
        }
    }

    Ok(())
}

async fn insert_participants(
    tx: &mut Transaction<'_, Sqlite>,
    movement_id: &str,
    participants: &[ParticipantInput],
) -> AppResult<()> {
    for p in participants {
        sqlx::query(
            "INSERT INTO movement_participants
             (id, movement_id, participant_user_id, participant_contact_id, percentage)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(movement_id)
        .bind(&p.user_id)
        .bind(&p.contact_id)
        .bind(p.percentage)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Inbound DEBT_PAYMENT movements credit the receiver account. The payer
/// side never posts a debit.
fn posting(movement_type: &str, receiver_account_id: &Option<String>, amount: f64) -> Option<(String, f64)> {
    if movement_type == MovementKind::DebtPayment.as_str() {
        receiver_account_id
            .as_ref()
            .map(|account| (account.clone(), amount))
    } else {
        None
    }
}

async fn apply_posting(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: &str,
    delta: f64,
) -> AppResult<()> {
    sqlx::query("UPDATE accounts SET current_balance = current_balance + ? WHERE id = ?")
        .bind(delta)
        .bind(account_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn party_display_name(
    pool: &SqlitePool,
    user_id: &Option<String>,
    contact_id: &Option<String>,
) -> AppResult<Option<String>> {
    if let Some(user_id) = user_id {
        let name: Option<String> = sqlx::query_scalar("SELECT display_name FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        return Ok(name);
    }
    if let Some(contact_id) = contact_id {
        let name: Option<String> =
            sqlx::query_scalar("SELECT display_name FROM contacts WHERE id = ?")
                .bind(contact_id)
                .fetch_optional(pool)
                .await?;
        return Ok(name);
    }
    Ok(None)
}

/// Enrich a stored row with every name a consumer would otherwise join for.
pub async fn enrich(pool: &SqlitePool, movement: Movement) -> AppResult<MovementWithDetails> {
    let payer_name =
        party_display_name(pool, &movement.payer_user_id, &movement.payer_contact_id).await?;
    let counterparty_name = party_display_name(
        pool,
        &movement.counterparty_user_id,
        &movement.counterparty_contact_id,
    )
    .await?;

    let payment_method_name: Option<String> = match &movement.payment_method_id {
        Some(id) => {
            sqlx::query_scalar("SELECT name FROM payment_methods WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let receiver_account_name: Option<String> = match &movement.receiver_account_id {
        Some(id) => {
            sqlx::query_scalar("SELECT name FROM accounts WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let participants: Vec<ParticipantWithName> = sqlx::query_as(
        "SELECT mp.id, mp.participant_user_id, mp.participant_contact_id,
                COALESCE(u.display_name, c.display_name, '') AS participant_name,
                mp.percentage
         FROM movement_participants mp
         LEFT JOIN users u ON mp.participant_user_id = u.id
         LEFT JOIN contacts c ON mp.participant_contact_id = c.id
         WHERE mp.movement_id = ?
         ORDER BY mp.percentage DESC, participant_name ASC",
    )
    .bind(&movement.id)
    .fetch_all(pool)
    .await?;

    Ok(MovementWithDetails {
        movement,
        payer_name,
        counterparty_name,
        payment_method_name,
        receiver_account_name,
        participants,
    })
}

async fn fetch_movement(
    pool: &SqlitePool,
    household_id: &str,
    movement_id: &str,
) -> AppResult<Movement> {
    let movement: Option<Movement> =
        sqlx::query_as("SELECT * FROM movements WHERE id = ? AND household_id = ?")
            .bind(movement_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    movement.ok_or_else(|| AppError::NotFound("Movimiento no encontrado".to_string()))
}

pub async fn get_movement(
    pool: &SqlitePool,
    member: &HouseholdMember,
    movement_id: &str,
) -> AppResult<MovementWithDetails> {
    let movement = fetch_movement(pool, &member.household_id, movement_id).await?;
    enrich(pool, movement).await
}

pub async fn list_movements(
    pool: &SqlitePool,
    member: &HouseholdMember,
    query: &ListMovementsQuery,
) -> AppResult<Vec<MovementWithDetails>> {
    let mut conditions = vec!["household_id = ?".to_string()];
    let mut binds: Vec<String> = vec![member.household_id.clone()];

    if let Some(movement_type) = &query.movement_type {
        if MovementKind::from_str(movement_type).is_none() {
            return Err(AppError::Validation(
                "Tipo de movimiento inválido".to_string(),
            ));
        }
        conditions.push("movement_type = ?".to_string());
        binds.push(movement_type.clone());
    }

    if let Some(month) = &query.month {
        conditions.push("movement_date LIKE ?".to_string());
        binds.push(format!("{}-%", month));
    }

    if let Some(category_id) = &query.category_id {
        conditions.push("category_id = ?".to_string());
        binds.push(category_id.clone());
    }

    if let Some(payer_user_id) = &query.payer_user_id {
        conditions.push("payer_user_id = ?".to_string());
        binds.push(payer_user_id.clone());
    }

    if let Some(payer_contact_id) = &query.payer_contact_id {
        conditions.push("payer_contact_id = ?".to_string());
        binds.push(payer_contact_id.clone());
    }

    if let Some(member_id) = &query.member_id {
        conditions.push(
            "(payer_user_id = ? OR payer_contact_id = ? OR counterparty_user_id = ?
              OR counterparty_contact_id = ? OR id IN (
                  SELECT movement_id FROM movement_participants
                  WHERE participant_user_id = ? OR participant_contact_id = ?))"
                .to_string(),
        );
        for _ in 0..6 {
            binds.push(member_id.clone());
        }
    }

    match query.projection.as_deref() {
        Some("expenses") => {
            conditions.push("(category_name IS NULL OR category_name != ?)".to_string());
            binds.push(LOAN_CATEGORY_NAME.to_string());
        }
        Some("debts") => {
            conditions.push(
                "(movement_type IN ('SPLIT', 'DEBT_PAYMENT') OR category_name = ?)".to_string(),
            );
            binds.push(LOAN_CATEGORY_NAME.to_string());
        }
        _ => {}
    }

    let sql = format!(
        "SELECT * FROM movements WHERE {} ORDER BY movement_date DESC, created_at DESC, id DESC",
        conditions.join(" AND ")
    );

    let mut query_builder = sqlx::query_as::<_, Movement>(&sql);
    for bind in &binds {
        query_builder = query_builder.bind(bind);
    }
    let movements = query_builder.fetch_all(pool).await?;

    let mut result = Vec::with_capacity(movements.len());
    for movement in movements {
        result.push(enrich(pool, movement).await?);
    }
    Ok(result)
}

pub async fn create_movement(
    pool: &SqlitePool,
    audit: &AuditHandle,
    member: &HouseholdMember,
    input: CreateMovement,
) -> AppResult<MovementWithDetails> {
    match create_inner(pool, member, input).await {
        Ok(details) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementCreated, ResourceType::Movement)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(&details.movement.id)
                    .new_values(&details),
            );
            Ok(details)
        }
        Err(e) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementCreated, ResourceType::Movement)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .failed(&e.to_string()),
            );
            Err(e)
        }
    }
}

async fn create_inner(
    pool: &SqlitePool,
    member: &HouseholdMember,
    input: CreateMovement,
) -> AppResult<MovementWithDetails> {
    let amount = validate_amount(input.amount)?;

    let shape = MovementShape {
        kind: input.movement_type,
        payer_user_id: &input.payer_user_id,
        payer_contact_id: &input.payer_contact_id,
        counterparty_user_id: &input.counterparty_user_id,
        counterparty_contact_id: &input.counterparty_contact_id,
        category_id: &input.category_id,
        payment_method_id: &input.payment_method_id,
        receiver_account_id: &input.receiver_account_id,
        participants: input.participants.as_deref(),
    };
    validate_shape(pool, &member.household_id, &shape).await?;

    let movement_date = match &input.movement_date {
        Some(date) => {
            schedule::parse_date(date)
                .ok_or_else(|| AppError::Validation("Fecha inválida".to_string()))?;
            date.clone()
        }
        None => schedule::format_date(schedule::today()),
    };

    let currency_code: String =
        sqlx::query_scalar("SELECT currency_code FROM households WHERE id = ?")
            .bind(&member.household_id)
            .fetch_one(pool)
            .await?;

    let category_name_shadow = match &input.category_id {
        Some(category_id) => Some(category_name(pool, &member.household_id, category_id).await?),
        None => None,
    };

    let movement_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO movements (
            id, household_id, movement_type, description, amount, currency_code,
            category_id, category_name, movement_date,
            payer_user_id, payer_contact_id, counterparty_user_id, counterparty_contact_id,
            payment_method_id, receiver_account_id, generated_from_template_id,
            created_by_user_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)",
    )
    .bind(&movement_id)
    .bind(&member.household_id)
    .bind(input.movement_type.as_str())
    .bind(&input.description)
    .bind(amount)
    .bind(&currency_code)
    .bind(&input.category_id)
    .bind(&category_name_shadow)
    .bind(&movement_date)
    .bind(&input.payer_user_id)
    .bind(&input.payer_contact_id)
    .bind(&input.counterparty_user_id)
    .bind(&input.counterparty_contact_id)
    .bind(&input.payment_method_id)
    .bind(&input.receiver_account_id)
    .bind(&member.user_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    if let Some(participants) = &input.participants {
        if input.movement_type == MovementKind::Split {
            insert_participants(&mut tx, &movement_id, participants).await?;
        }
    }

    if let Some((account_id, credit)) = posting(
        input.movement_type.as_str(),
        &input.receiver_account_id,
        amount,
    ) {
        apply_posting(&mut tx, &account_id, credit).await?;
    }

    tx.commit().await?;

    let movement = fetch_movement(pool, &member.household_id, &movement_id).await?;
    enrich(pool, movement).await
}

/// Resolve the mutation scope for a movement. Movements generated from a
/// template require an explicit scope.
fn resolve_scope(movement: &Movement, scope_raw: &Option<String>) -> AppResult<MutationScope> {
    if movement.generated_from_template_id.is_none() {
        return Ok(MutationScope::This);
    }
    match scope_raw {
        Some(raw) => MutationScope::from_str(raw).ok_or_else(|| {
            AppError::Scope(format!("Alcance desconocido: {}", raw))
        }),
        None => Err(AppError::Scope(
            "Indica el alcance (this, future o all) para un movimiento generado".to_string(),
        )),
    }
}

pub async fn update_movement(
    pool: &SqlitePool,
    audit: &AuditHandle,
    member: &HouseholdMember,
    movement_id: &str,
    scope_raw: &Option<String>,
    patch: UpdateMovement,
) -> AppResult<MovementWithDetails> {
    let existing = fetch_movement(pool, &member.household_id, movement_id).await?;

    // Empty patch is a no-op and leaves no audit trace
    if patch.is_empty() {
        return enrich(pool, existing).await;
    }

    let old_snapshot = existing.clone();

    match update_inner(pool, member, existing, scope_raw, patch).await {
        Ok(details) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementUpdated, ResourceType::Movement)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(movement_id)
                    .old(&old_snapshot)
                    .new_values(&details),
            );
            Ok(details)
        }
        Err(e) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementUpdated, ResourceType::Movement)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(movement_id)
                    .failed(&e.to_string()),
            );
            Err(e)
        }
    }
}

async fn update_inner(
    pool: &SqlitePool,
    member: &HouseholdMember,
    existing: Movement,
    scope_raw: &Option<String>,
    patch: UpdateMovement,
) -> AppResult<MovementWithDetails> {
    let scope = resolve_scope(&existing, scope_raw)?;
    let kind = existing
        .kind()
        .ok_or_else(|| AppError::Internal("Tipo de movimiento corrupto".to_string()))?;

    // Counterparty is only meaningful for debt payments
    if kind != MovementKind::DebtPayment
        && (patch.counterparty_user_id.is_some() || patch.counterparty_contact_id.is_some())
    {
        return Err(AppError::Validation(
            "Solo un pago de deuda lleva contraparte".to_string(),
        ));
    }
    if kind != MovementKind::Split && patch.participants.is_some() {
        return Err(AppError::Validation(
            "Solo un gasto compartido lleva participantes".to_string(),
        ));
    }

    let mut updated = existing.clone();

    if let Some(description) = &patch.description {
        updated.description = description.clone();
    }
    if let Some(amount) = patch.amount {
        updated.amount = validate_amount(amount)?;
    }
    if let Some(movement_date) = &patch.movement_date {
        schedule::parse_date(movement_date)
            .ok_or_else(|| AppError::Validation("Fecha inválida".to_string()))?;
        updated.movement_date = movement_date.clone();
    }
    if let Some(category_id) = &patch.category_id {
        updated.category_name =
            Some(category_name(pool, &member.household_id, category_id).await?);
        updated.category_id = Some(category_id.clone());
    }
    if patch.payer_user_id.is_some() || patch.payer_contact_id.is_some() {
        updated.payer_user_id = patch.payer_user_id.clone();
        updated.payer_contact_id = patch.payer_contact_id.clone();
    }
    if patch.counterparty_user_id.is_some() || patch.counterparty_contact_id.is_some() {
        updated.counterparty_user_id = patch.counterparty_user_id.clone();
        updated.counterparty_contact_id = patch.counterparty_contact_id.clone();
    }
    if let Some(payment_method_id) = &patch.payment_method_id {
        updated.payment_method_id = Some(payment_method_id.clone());
    }
    if let Some(receiver_account_id) = &patch.receiver_account_id {
        updated.receiver_account_id = Some(receiver_account_id.clone());
    }

    // Revalidate the full shape with the patched values
    let current_participants: Vec<ParticipantInput> = match &patch.participants {
        Some(participants) => participants.clone(),
        None => {
            sqlx::query_as::<_, (Option<String>, Option<String>, f64)>(
                "SELECT participant_user_id, participant_contact_id, percentage
                 FROM movement_participants WHERE movement_id = ?",
            )
            .bind(&existing.id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|(user_id, contact_id, percentage)| ParticipantInput {
                user_id,
                contact_id,
                percentage,
            })
            .collect()
        }
    };

    let shape = MovementShape {
        kind,
        payer_user_id: &updated.payer_user_id,
        payer_contact_id: &updated.payer_contact_id,
        counterparty_user_id: &updated.counterparty_user_id,
        counterparty_contact_id: &updated.counterparty_contact_id,
        category_id: &updated.category_id,
        payment_method_id: &updated.payment_method_id,
        receiver_account_id: &updated.receiver_account_id,
        participants: if kind == MovementKind::Split {
            Some(current_participants.as_slice())
        } else {
            None
        },
    };
    validate_shape(pool, &member.household_id, &shape).await?;

    updated.updated_at = now_timestamp();

    let mut tx = pool.begin().await?;

    write_movement_row(&mut tx, &updated).await?;

    if let Some(participants) = &patch.participants {
        sqlx::query("DELETE FROM movement_participants WHERE movement_id = ?")
            .bind(&existing.id)
            .execute(&mut *tx)
            .await?;
        insert_participants(&mut tx, &existing.id, participants).await?;
    }

    move_posting(&mut tx, &existing, &updated).await?;

    // Widen to siblings and the template when asked
    if scope != MutationScope::This {
        if let Some(template_id) = &existing.generated_from_template_id {
            propagate_to_template(&mut tx, template_id, &updated).await?;
            propagate_to_siblings(&mut tx, template_id, &existing, &updated, scope).await?;
        }
    }

    tx.commit().await?;

    let movement = fetch_movement(pool, &member.household_id, &existing.id).await?;
    enrich(pool, movement).await
}

async fn write_movement_row(
    tx: &mut Transaction<'_, Sqlite>,
    movement: &Movement,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE movements SET
            description = ?, amount = ?, category_id = ?, category_name = ?,
            movement_date = ?, payer_user_id = ?, payer_contact_id = ?,
            counterparty_user_id = ?, counterparty_contact_id = ?,
            payment_method_id = ?, receiver_account_id = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&movement.description)
    .bind(movement.amount)
    .bind(&movement.category_id)
    .bind(&movement.category_name)
    .bind(&movement.movement_date)
    .bind(&movement.payer_user_id)
    .bind(&movement.payer_contact_id)
    .bind(&movement.counterparty_user_id)
    .bind(&movement.counterparty_contact_id)
    .bind(&movement.payment_method_id)
    .bind(&movement.receiver_account_id)
    .bind(&movement.updated_at)
    .bind(&movement.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Undo the old posting and apply the new one, collapsing to a delta when
/// the account is unchanged.
async fn move_posting(
    tx: &mut Transaction<'_, Sqlite>,
    old: &Movement,
    new: &Movement,
) -> AppResult<()> {
    let old_posting = posting(&old.movement_type, &old.receiver_account_id, old.amount);
    let new_posting = posting(&new.movement_type, &new.receiver_account_id, new.amount);

    match (old_posting, new_posting) {
        (Some((old_account, old_amount)), Some((new_account, new_amount)))
            if old_account == new_account =>
        {
            let delta = new_amount - old_amount;
            if delta != 0.0 {
                apply_posting(tx, &old_account, delta).await?;
            }
        }
        (old_posting, new_posting) => {
            if let Some((account, amount)) = old_posting {
                apply_posting(tx, &account, -amount).await?;
            }
            if let Some((account, amount)) = new_posting {
                apply_posting(tx, &account, amount).await?;
            }
        }
    }
    Ok(())
}

/// Copy the overlapping field domains of an edited movement back onto its
/// template (FUTURE / ALL scopes).
async fn propagate_to_template(
    tx: &mut Transaction<'_, Sqlite>,
    template_id: &str,
    updated: &Movement,
) -> AppResult<()> {
    // A category-less debt payment must not blank the template's NOT NULL
    // category
    sqlx::query(
        "UPDATE recurring_templates SET
            amount = ?, category_id = COALESCE(?, category_id),
            payer_user_id = ?, payer_contact_id = ?,
            counterparty_user_id = ?, counterparty_contact_id = ?,
            payment_method_id = ?, receiver_account_id = ?
         WHERE id = ?",
    )
    .bind(updated.amount)
    .bind(&updated.category_id)
    .bind(&updated.payer_user_id)
    .bind(&updated.payer_contact_id)
    .bind(&updated.counterparty_user_id)
    .bind(&updated.counterparty_contact_id)
    .bind(&updated.payment_method_id)
    .bind(&updated.receiver_account_id)
    .bind(template_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn propagate_to_siblings(
    tx: &mut Transaction<'_, Sqlite>,
    template_id: &str,
    target: &Movement,
    updated: &Movement,
    scope: MutationScope,
) -> AppResult<()> {
    let siblings: Vec<Movement> = match scope {
        MutationScope::Future => {
            sqlx::query_as(
                "SELECT * FROM movements
                 WHERE generated_from_template_id = ? AND id != ? AND movement_date >= ?",
            )
            .bind(template_id)
            .bind(&target.id)
            .bind(&target.movement_date)
            .fetch_all(&mut **tx)
            .await?
        }
        MutationScope::All => {
            sqlx::query_as(
                "SELECT * FROM movements WHERE generated_from_template_id = ? AND id != ?",
            )
            .bind(template_id)
            .bind(&target.id)
            .fetch_all(&mut **tx)
            .await?
        }
        MutationScope::This => return Ok(()),
    };

    let now = now_timestamp();
    for sibling in siblings {
        // Occurrence date stays per-movement; everything else follows the edit
        let mut new_sibling = sibling.clone();
        new_sibling.description = updated.description.clone();
        new_sibling.amount = updated.amount;
        new_sibling.category_id = updated.category_id.clone();
        new_sibling.category_name = updated.category_name.clone();
        new_sibling.payer_user_id = updated.payer_user_id.clone();
        new_sibling.payer_contact_id = updated.payer_contact_id.clone();
        new_sibling.counterparty_user_id = updated.counterparty_user_id.clone();
        new_sibling.counterparty_contact_id = updated.counterparty_contact_id.clone();
        new_sibling.payment_method_id = updated.payment_method_id.clone();
        new_sibling.receiver_account_id = updated.receiver_account_id.clone();
        new_sibling.updated_at = now.clone();

        write_movement_row(tx, &new_sibling).await?;
        move_posting(tx, &sibling, &new_sibling).await?;
    }

    Ok(())
}

pub async fn delete_movement(
    pool: &SqlitePool,
    audit: &AuditHandle,
    member: &HouseholdMember,
    movement_id: &str,
    scope_raw: &Option<String>,
) -> AppResult<()> {
    let existing = fetch_movement(pool, &member.household_id, movement_id).await?;
    let old_snapshot = existing.clone();

    match delete_inner(pool, existing, scope_raw).await {
        Ok(()) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementDeleted, ResourceType::Movement)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(movement_id)
                    .old(&old_snapshot),
            );
            Ok(())
        }
        Err(e) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementDeleted, ResourceType::Movement)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(movement_id)
                    .failed(&e.to_string()),
            );
            Err(e)
        }
    }
}

pub(crate) async fn delete_one(
    tx: &mut Transaction<'_, Sqlite>,
    movement: &Movement,
) -> AppResult<()> {
    if let Some((account, amount)) = posting(
        &movement.movement_type,
        &movement.receiver_account_id,
        movement.amount,
    ) {
        apply_posting(tx, &account, -amount).await?;
    }
    sqlx::query("DELETE FROM movements WHERE id = ?")
        .bind(&movement.id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn delete_inner(
    pool: &SqlitePool,
    existing: Movement,
    scope_raw: &Option<String>,
) -> AppResult<()> {
    let scope = resolve_scope(&existing, scope_raw)?;

    let mut tx = pool.begin().await?;

    delete_one(&mut tx, &existing).await?;

    if scope != MutationScope::This {
        if let Some(template_id) = &existing.generated_from_template_id {
            let siblings: Vec<Movement> = match scope {
                MutationScope::Future => {
                    sqlx::query_as(
                        "SELECT * FROM movements
                         WHERE generated_from_template_id = ? AND movement_date >= ?",
                    )
                    .bind(template_id)
                    .bind(&existing.movement_date)
                    .fetch_all(&mut *tx)
                    .await?
                }
                MutationScope::All => {
                    sqlx::query_as("SELECT * FROM movements WHERE generated_from_template_id = ?")
                        .bind(template_id)
                        .fetch_all(&mut *tx)
                        .await?
                }
                MutationScope::This => Vec::new(),
            };

            for sibling in &siblings {
                delete_one(&mut tx, sibling).await?;
            }

            match scope {
                MutationScope::Future => {
                    sqlx::query("UPDATE recurring_templates SET is_active = 0 WHERE id = ?")
                        .bind(template_id)
                        .execute(&mut *tx)
                        .await?;
                }
                MutationScope::All => {
                    sqlx::query("DELETE FROM recurring_templates WHERE id = ?")
                        .bind(template_id)
                        .execute(&mut *tx)
                        .await?;
                }
                MutationScope::This => {}
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_money_half_even() {
        assert_eq!(round_money(10.005), 10.0);
        assert_eq!(round_money(10.015), 10.02);
        assert_eq!(round_money(10.004), 10.0);
        assert_eq!(round_money(250000.0), 250000.0);
    }

    #[test]
    fn test_validate_amount_rejects_zero_after_rounding() {
        assert!(validate_amount(0.004).is_err());
        assert!(validate_amount(0.0).is_err());
        assert!(validate_amount(-5.0).is_err());
        assert_eq!(validate_amount(0.006).unwrap(), 0.01);
    }

    #[test]
    fn test_posting_only_for_debt_payment_with_account() {
        assert!(posting("HOUSEHOLD", &Some("a".to_string()), 10.0).is_none());
        assert!(posting("DEBT_PAYMENT", &None, 10.0).is_none());
        assert_eq!(
            posting("DEBT_PAYMENT", &Some("a".to_string()), 10.0),
            Some(("a".to_string(), 10.0))
        );
    }

    #[test]
    fn test_resolve_scope_requires_scope_for_generated() {
        let mut movement = Movement {
            id: "m1".to_string(),
            household_id: "h1".to_string(),
            movement_type: "HOUSEHOLD".to_string(),
            description: String::new(),
            amount: 10.0,
            currency_code: "COP".to_string(),
            category_id: None,
            category_name: None,
            movement_date: "2026-01-01".to_string(),
            payer_user_id: None,
            payer_contact_id: None,
            counterparty_user_id: None,
            counterparty_contact_id: None,
            payment_method_id: None,
            receiver_account_id: None,
            generated_from_template_id: None,
            created_by_user_id: "u1".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };

        // Manual movements never need a scope
        assert_eq!(
            resolve_scope(&movement, &None).unwrap(),
            MutationScope::This
        );

        movement.generated_from_template_id = Some("t1".to_string());
        assert!(matches!(
            resolve_scope(&movement, &None),
            Err(AppError::Scope(_))
        ));
        assert!(matches!(
            resolve_scope(&movement, &Some("everything".to_string())),
            Err(AppError::Scope(_))
        ));
        assert_eq!(
            resolve_scope(&movement, &Some("future".to_string())).unwrap(),
            MutationScope::Future
        );
    }
}
