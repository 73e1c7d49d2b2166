use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::auth::HouseholdMember;
use crate::error::AppResult;
use crate::models::{Movement, MovementKind};
use crate::services::movements::round_money;

/// Balances smaller than one cent are noise from share rounding.
const MIN_BALANCE: f64 = 0.01;

/// Graph node: a registered user or a household-local contact. Contacts in
/// other households that link to the caller are translated to the caller's
/// user key before summing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum PartyKey {
    User(String),
    Contact(String),
}

impl PartyKey {
    fn id(&self) -> &str {
        match self {
            PartyKey::User(id) => id,
            PartyKey::Contact(id) => id,
        }
    }
}

/// A movement that justifies part of a balance.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceMovement {
    pub movement_id: String,
    pub movement_type: String,
    pub description: String,
    pub movement_date: String,
    pub amount: f64,
    pub is_cross_household: bool,
    pub source_household_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DebtBalance {
    pub debtor_id: String,
    pub debtor_name: String,
    pub creditor_id: String,
    pub creditor_name: String,
    pub amount: f64,
    pub currency: String,
    pub is_cross_household: bool,
    pub movements: Vec<BalanceMovement>,
}

#[derive(Debug, Serialize)]
pub struct ConsolidatedDebts {
    pub month: Option<String>,
    pub balances: Vec<DebtBalance>,
}

struct ScopedMovement {
    movement: Movement,
    cross_household: bool,
    source_household_name: Option<String>,
    /// Contact id in the source household that stands for the caller.
    caller_contact_id: Option<String>,
}

/// Net-debt projection over the movement set. Pure read; deterministic and
/// independent of row insertion order.
pub async fn consolidate(
    pool: &SqlitePool,
    member: &HouseholdMember,
    month: Option<String>,
) -> AppResult<ConsolidatedDebts> {
    let mut scoped = collect_local(pool, &member.household_id, &month).await?;
    scoped.extend(collect_cross_household(pool, member, &month).await?);

    // Chronological order carries into each balance's movement list
    scoped.sort_by(|a, b| {
        (
            &a.movement.movement_date,
            &a.movement.created_at,
            &a.movement.id,
        )
            .cmp(&(
                &b.movement.movement_date,
                &b.movement.created_at,
                &b.movement.id,
            ))
    });

    // Signed edges: owed[(debtor, creditor)] accumulates what debtor owes
    // creditor. A DEBT_PAYMENT subtracts from the payer's debt.
    let mut owed: HashMap<(PartyKey, PartyKey), f64> = HashMap::new();
    let mut pair_movements: HashMap<(PartyKey, PartyKey), Vec<BalanceMovement>> = HashMap::new();

    for scoped_movement in &scoped {
        let edges = movement_edges(pool, member, scoped_movement).await?;
        if edges.is_empty() {
            continue;
        }

        let summary = BalanceMovement {
            movement_id: scoped_movement.movement.id.clone(),
            movement_type: scoped_movement.movement.movement_type.clone(),
            description: scoped_movement.movement.description.clone(),
            movement_date: scoped_movement.movement.movement_date.clone(),
            amount: scoped_movement.movement.amount,
            is_cross_household: scoped_movement.cross_household,
            source_household_name: scoped_movement.source_household_name.clone(),
        };

        for (debtor, creditor, amount) in edges {
            let pair = unordered_pair(&debtor, &creditor);
            let entry = pair_movements.entry(pair).or_default();
            if entry.last().map(|m| &m.movement_id) != Some(&summary.movement_id) {
                entry.push(summary.clone());
            }
            *owed.entry((debtor, creditor)).or_insert(0.0) += amount;
        }
    }

    // Collapse the two directions of every pair into at most one balance
    let mut pairs: Vec<(PartyKey, PartyKey)> = pair_movements.keys().cloned().collect();
    pairs.sort();

    let currency: String = sqlx::query_scalar("SELECT currency_code FROM households WHERE id = ?")
        .bind(&member.household_id)
        .fetch_one(pool)
        .await?;

    let mut balances = Vec::new();
    for (a, b) in pairs {
        let forward = owed.get(&(a.clone(), b.clone())).copied().unwrap_or(0.0);
        let backward = owed.get(&(b.clone(), a.clone())).copied().unwrap_or(0.0);
        let net = round_money(forward - backward);

        if net.abs() < MIN_BALANCE {
            continue;
        }

        let (debtor, creditor, amount) = if net > 0.0 {
            (a.clone(), b.clone(), net)
        } else {
            (b.clone(), a.clone(), -net)
        };

        let movements = pair_movements
            .get(&unordered_pair(&debtor, &creditor))
            .cloned()
            .unwrap_or_default();
        let is_cross_household = movements.iter().any(|m| m.is_cross_household);

        balances.push(DebtBalance {
            debtor_name: party_name(pool, &debtor).await?,
            creditor_name: party_name(pool, &creditor).await?,
            debtor_id: debtor.id().to_string(),
            creditor_id: creditor.id().to_string(),
            amount,
            currency: currency.clone(),
            is_cross_household,
            movements,
        });
    }

    Ok(ConsolidatedDebts { month, balances })
}

fn unordered_pair(a: &PartyKey, b: &PartyKey) -> (PartyKey, PartyKey) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

async fn collect_local(
    pool: &SqlitePool,
    household_id: &str,
    month: &Option<String>,
) -> AppResult<Vec<ScopedMovement>> {
    let movements = fetch_scope_movements(pool, household_id, month, None).await?;
    Ok(movements
        .into_iter()
        .map(|movement| ScopedMovement {
            movement,
            cross_household: false,
            source_household_name: None,
            caller_contact_id: None,
        })
        .collect())
}

/// Movements of other households where a contact linked to the caller
/// appears as payer, counterparty or participant.
async fn collect_cross_household(
    pool: &SqlitePool,
    member: &HouseholdMember,
    month: &Option<String>,
) -> AppResult<Vec<ScopedMovement>> {
    let links: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT c.id, c.household_id, h.name
         FROM contacts c
         JOIN households h ON c.household_id = h.id
         WHERE c.linked_user_id = ? AND c.household_id != ?",
    )
    .bind(&member.user_id)
    .bind(&member.household_id)
    .fetch_all(pool)
    .await?;

    let mut result = Vec::new();
    for (contact_id, household_id, household_name) in links {
        let movements =
            fetch_scope_movements(pool, &household_id, month, Some(&contact_id)).await?;
        for movement in movements {
            result.push(ScopedMovement {
                movement,
                cross_household: true,
                source_household_name: Some(household_name.clone()),
                caller_contact_id: Some(contact_id.clone()),
            });
        }
    }
    Ok(result)
}

async fn fetch_scope_movements(
    pool: &SqlitePool,
    household_id: &str,
    month: &Option<String>,
    involving_contact: Option<&str>,
) -> AppResult<Vec<Movement>> {
    let mut sql = String::from(
        "SELECT * FROM movements
         WHERE household_id = ? AND movement_type IN ('SPLIT', 'DEBT_PAYMENT')",
    );
    let mut binds: Vec<String> = vec![household_id.to_string()];

    if let Some(month) = month {
        sql.push_str(" AND movement_date LIKE ?");
        binds.push(format!("{}-%", month));
    }

    if let Some(contact_id) = involving_contact {
        sql.push_str(
            " AND (payer_contact_id = ? OR counterparty_contact_id = ? OR id IN (
                 SELECT movement_id FROM movement_participants WHERE participant_contact_id = ?))",
        );
        for _ in 0..3 {
            binds.push(contact_id.to_string());
        }
    }

    sql.push_str(" ORDER BY movement_date ASC, created_at ASC, id ASC");

    let mut query_builder = sqlx::query_as::<_, Movement>(&sql);
    for bind in &binds {
        query_builder = query_builder.bind(bind);
    }
    Ok(query_builder.fetch_all(pool).await?)
}

/// Translate the flat id columns into a graph key, mapping the caller's
/// linked contact back to the caller for cross-household movements.
fn party_key(
    user_id: &Option<String>,
    contact_id: &Option<String>,
    scoped: &ScopedMovement,
    caller_user_id: &str,
) -> Option<PartyKey> {
    if let Some(user_id) = user_id {
        return Some(PartyKey::User(user_id.clone()));
    }
    let contact_id = contact_id.as_ref()?;
    if scoped.caller_contact_id.as_deref() == Some(contact_id.as_str()) {
        return Some(PartyKey::User(caller_user_id.to_string()));
    }
    Some(PartyKey::Contact(contact_id.clone()))
}

/// Signed edges contributed by one movement: (debtor, creditor, amount).
async fn movement_edges(
    pool: &SqlitePool,
    member: &HouseholdMember,
    scoped: &ScopedMovement,
) -> AppResult<Vec<(PartyKey, PartyKey, f64)>> {
    let movement = &scoped.movement;
    let mut edges = Vec::new();

    match movement.kind() {
        Some(MovementKind::Split) => {
            let Some(payer) = party_key(
                &movement.payer_user_id,
                &movement.payer_contact_id,
                scoped,
                &member.user_id,
            ) else {
                return Ok(edges);
            };

            let participants: Vec<(Option<String>, Option<String>, f64)> = sqlx::query_as(
                "SELECT participant_user_id, participant_contact_id, percentage
                 FROM movement_participants WHERE movement_id = ?",
            )
            .bind(&movement.id)
            .fetch_all(pool)
            .await?;

            for (user_id, contact_id, percentage) in participants {
                let Some(participant) = party_key(&user_id, &contact_id, scoped, &member.user_id)
                else {
                    continue;
                };
                if participant == payer {
                    continue;
                }
                let share = round_money(movement.amount * percentage);
                edges.push((participant, payer.clone(), share));
            }
        }
        Some(MovementKind::DebtPayment) => {
            let payer = party_key(
                &movement.payer_user_id,
                &movement.payer_contact_id,
                scoped,
                &member.user_id,
            );
            let counterparty = party_key(
                &movement.counterparty_user_id,
                &movement.counterparty_contact_id,
                scoped,
                &member.user_id,
            );
            if let (Some(payer), Some(counterparty)) = (payer, counterparty) {
                // The payment cancels prior debt from payer to counterparty
                edges.push((payer, counterparty, -movement.amount));
            }
        }
        _ => {}
    }

    // Cross-household movements only contribute edges that touch the caller
    if scoped.cross_household {
        let caller = PartyKey::User(member.user_id.clone());
        edges.retain(|(debtor, creditor, _)| debtor == &caller || creditor == &caller);
    }

    Ok(edges)
}

async fn party_name(pool: &SqlitePool, key: &PartyKey) -> AppResult<String> {
    let name: Option<String> = match key {
        PartyKey::User(id) => {
            sqlx::query_scalar("SELECT display_name FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        PartyKey::Contact(id) => {
            sqlx::query_scalar("SELECT display_name FROM contacts WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
    };
    Ok(name.unwrap_or_default())
}
