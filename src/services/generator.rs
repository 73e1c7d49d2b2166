use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, Movement, RecurringTemplate, ResourceType};
use crate::services::audit::AuditHandle;
use crate::services::schedule;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub generated: usize,
    pub deactivated: usize,
}

/// Spawns the tick loop. Single-instance worker; every `interval_hours` it
/// materializes due templates.
pub fn spawn_generator(
    pool: SqlitePool,
    audit: AuditHandle,
    interval_hours: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(interval_hours * 3600);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match run_generation(&pool, &audit).await {
                Ok(outcome) => {
                    if outcome.generated > 0 || outcome.deactivated > 0 {
                        tracing::info!(
                            generated = outcome.generated,
                            deactivated = outcome.deactivated,
                            "Generator tick completed"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!("Generator tick failed: {}", e);
                }
            }
        }
    })
}

/// One generation pass. Idempotent: each template is re-read inside its own
/// transaction and an existing (template, date) movement short-circuits the
/// insert, so running the pass twice back-to-back changes nothing. SQLite's
/// single-writer transaction stands in for row-level FOR UPDATE locking.
pub async fn run_generation(pool: &SqlitePool, audit: &AuditHandle) -> AppResult<GenerationOutcome> {
    let today = schedule::format_date(schedule::today());

    let due_ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM recurring_templates
         WHERE is_active = 1 AND auto_generate = 1 AND next_scheduled_date <= ?
           AND (end_date IS NULL OR next_scheduled_date <= end_date)
         ORDER BY next_scheduled_date ASC, id ASC",
    )
    .bind(&today)
    .fetch_all(pool)
    .await?;

    let mut outcome = GenerationOutcome::default();

    for template_id in due_ids {
        match generate_for_template(pool, audit, &template_id, &today).await {
            Ok(Some(deactivated)) => {
                outcome.generated += 1;
                if deactivated {
                    outcome.deactivated += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // One bad template never blocks the rest of the pass
                tracing::error!(template_id = %template_id, "Template generation failed: {}", e);
            }
        }
    }

    Ok(outcome)
}

/// Returns Some(deactivated) when a movement was generated, None when the
/// template was skipped.
async fn generate_for_template(
    pool: &SqlitePool,
    audit: &AuditHandle,
    template_id: &str,
    today: &str,
) -> AppResult<Option<bool>> {
    let mut tx = pool.begin().await?;

    // Re-read under the transaction so concurrent passes serialize
    let template: Option<RecurringTemplate> = sqlx::query_as(
        "SELECT * FROM recurring_templates
         WHERE id = ? AND is_active = 1 AND auto_generate = 1 AND next_scheduled_date <= ?",
    )
    .bind(template_id)
    .bind(today)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(template) = template else {
        return Ok(None);
    };

    let pattern = template
        .pattern()
        .ok_or_else(|| AppError::Internal("Patrón de recurrencia corrupto".to_string()))?;

    let due_date = template.next_scheduled_date.clone();

    // Idempotence: a movement already generated for this date ends the pass
    // for this template, but the schedule still advances
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM movements
         WHERE generated_from_template_id = ? AND movement_date = ?",
    )
    .bind(&template.id)
    .bind(&due_date)
    .fetch_optional(&mut *tx)
    .await?;

    let mut generated_movement: Option<Movement> = None;

    if existing.is_none() {
        let created_by: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM household_members
             WHERE household_id = ? AND role = 'owner'
             ORDER BY joined_at ASC LIMIT 1",
        )
        .bind(&template.household_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(created_by) = created_by else {
            return Err(AppError::Internal(format!(
                "El hogar {} no tiene propietario",
                template.household_id
            )));
        };

        let category_name: Option<String> =
            sqlx::query_scalar("SELECT name FROM categories WHERE id = ?")
                .bind(&template.category_id)
                .fetch_optional(&mut *tx)
                .await?;

        let movement_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string();

        sqlx::query(
            "INSERT INTO movements (
                id, household_id, movement_type, description, amount, currency_code,
                category_id, category_name, movement_date,
                payer_user_id, payer_contact_id, counterparty_user_id, counterparty_contact_id,
                payment_method_id, receiver_account_id, generated_from_template_id,
                created_by_user_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&movement_id)
        .bind(&template.household_id)
        .bind(&template.movement_type)
        .bind(template.description.as_deref().unwrap_or(&template.name))
        .bind(template.amount)
        .bind(&template.currency_code)
        .bind(&template.category_id)
        .bind(&category_name)
        .bind(&due_date)
        .bind(&template.payer_user_id)
        .bind(&template.payer_contact_id)
        .bind(&template.counterparty_user_id)
        .bind(&template.counterparty_contact_id)
        .bind(&template.payment_method_id)
        .bind(&template.receiver_account_id)
        .bind(&template.id)
        .bind(&created_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let template_participants: Vec<(Option<String>, Option<String>, f64)> = sqlx::query_as(
            "SELECT participant_user_id, participant_contact_id, percentage
             FROM recurring_template_participants WHERE template_id = ?",
        )
        .bind(&template.id)
        .fetch_all(&mut *tx)
        .await?;

        for (user_id, contact_id, percentage) in template_participants {
            sqlx::query(
                "INSERT INTO movement_participants
                    (id, movement_id, participant_user_id, participant_contact_id, percentage)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&movement_id)
            .bind(&user_id)
            .bind(&contact_id)
            .bind(percentage)
            .execute(&mut *tx)
            .await?;
        }

        // Inbound debt payments credit the receiver account, same as manual
        // movements
        if template.movement_type == "DEBT_PAYMENT" {
            if let Some(account_id) = &template.receiver_account_id {
                sqlx::query(
                    "UPDATE accounts SET current_balance = current_balance + ? WHERE id = ?",
                )
                .bind(template.amount)
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let movement: Movement = sqlx::query_as("SELECT * FROM movements WHERE id = ?")
            .bind(&movement_id)
            .fetch_one(&mut *tx)
            .await?;
        generated_movement = Some(movement);
    }

    // Advance the schedule one period
    let current = schedule::parse_date(&due_date)
        .ok_or_else(|| AppError::Internal("Fecha programada corrupta".to_string()))?;
    let next = schedule::advance_one_period(
        pattern,
        current,
        template.day_of_month.map(|d| d as u32),
    );
    let next_str = schedule::format_date(next);

    let past_end = template
        .end_date
        .as_deref()
        .is_some_and(|end| next_str.as_str() > end);

    sqlx::query(
        "UPDATE recurring_templates
         SET last_generated_date = ?, next_scheduled_date = ?, is_active = ?
         WHERE id = ?",
    )
    .bind(&due_date)
    .bind(&next_str)
    .bind(!past_end)
    .bind(&template.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    match generated_movement {
        Some(movement) => {
            audit.log(
                AuditEntry::new(AuditAction::MovementAutoGenerated, ResourceType::Movement)
                    .household(&template.household_id)
                    .resource(&movement.id)
                    .new_values(&movement),
            );
            Ok(Some(past_end))
        }
        None => Ok(None),
    }
}
