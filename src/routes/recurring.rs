use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::HouseholdMember,
    error::{AppError, AppResult},
    models::{
        AuditAction, AuditEntry, CreateTemplate, MovementPrefill, MutationScope,
        ParticipantInput, PrefillQuery, RecurringTemplate, ResourceType, ScopeQuery,
        TemplateWithParticipants, UpdateTemplate,
    },
    services::audit::AuditHandle,
    services::generator,
    services::movements::{validate_amount, validate_shape, MovementShape},
    services::schedule,
    services::templates,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/generate", post(generate_now))
        .route("/category/{category_id}", get(list_by_category))
        .route("/prefill/{template_id}", get(prefill))
        .route(
            "/{template_id}",
            axum::routing::put(update_template).delete(delete_template),
        )
}

async fn list_templates(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<TemplateWithParticipants>>> {
    let rows: Vec<RecurringTemplate> = sqlx::query_as(
        "SELECT * FROM recurring_templates WHERE household_id = ? ORDER BY name ASC",
    )
    .bind(&member.household_id)
    .fetch_all(&pool)
    .await?;

    let mut result = Vec::with_capacity(rows.len());
    for template in rows {
        result.push(templates::with_participants(&pool, template).await?);
    }
    Ok(Json(result))
}

async fn list_by_category(
    Path(category_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<TemplateWithParticipants>>> {
    let rows: Vec<RecurringTemplate> = sqlx::query_as(
        "SELECT * FROM recurring_templates
         WHERE household_id = ? AND category_id = ? ORDER BY name ASC",
    )
    .bind(&member.household_id)
    .bind(&category_id)
    .fetch_all(&pool)
    .await?;

    let mut result = Vec::with_capacity(rows.len());
    for template in rows {
        result.push(templates::with_participants(&pool, template).await?);
    }
    Ok(Json(result))
}

async fn create_template(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateTemplate>,
) -> AppResult<(StatusCode, Json<TemplateWithParticipants>)> {
    let attempt = AuditEntry::new(AuditAction::TemplateCreated, ResourceType::RecurringTemplate)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        let amount = validate_amount(input.amount)?;
        let auto_generate = input.auto_generate.unwrap_or(false);

        templates::validate_schedule(
            input.recurrence_pattern,
            auto_generate,
            input.day_of_month,
            input.month_of_year,
            &input.start_date,
            input.end_date.as_deref(),
        )?;

        let category_id = Some(input.category_id.clone());
        let shape = MovementShape {
            kind: input.movement_type,
            payer_user_id: &input.payer_user_id,
            payer_contact_id: &input.payer_contact_id,
            counterparty_user_id: &input.counterparty_user_id,
            counterparty_contact_id: &input.counterparty_contact_id,
            category_id: &category_id,
            payment_method_id: &input.payment_method_id,
            receiver_account_id: &input.receiver_account_id,
            participants: input.participants.as_deref(),
        };
        validate_shape(&pool, &member.household_id, &shape).await?;

        let start = schedule::parse_date(&input.start_date)
            .ok_or_else(|| AppError::Validation("Fecha de inicio inválida".to_string()))?;
        let next_scheduled = schedule::first_occurrence(
            input.recurrence_pattern,
            start,
            input.day_of_month.map(|d| d as u32),
            input.month_of_year.map(|m| m as u32),
        );

        let currency_code: String =
            sqlx::query_scalar("SELECT currency_code FROM households WHERE id = ?")
                .bind(&member.household_id)
                .fetch_one(&pool)
                .await?;

        let template_id = Uuid::new_v4().to_string();

        let mut tx = pool.begin().await?;
        sqlx::query(
            "INSERT INTO recurring_templates (
                id, household_id, name, description, category_id, movement_type, amount,
                currency_code, payer_user_id, payer_contact_id,
                counterparty_user_id, counterparty_contact_id,
                payment_method_id, receiver_account_id, auto_generate, recurrence_pattern,
                day_of_month, month_of_year, start_date, end_date, next_scheduled_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&template_id)
        .bind(&member.household_id)
        .bind(name)
        .bind(&input.description)
        .bind(&input.category_id)
        .bind(input.movement_type.as_str())
        .bind(amount)
        .bind(&currency_code)
        .bind(&input.payer_user_id)
        .bind(&input.payer_contact_id)
        .bind(&input.counterparty_user_id)
        .bind(&input.counterparty_contact_id)
        .bind(&input.payment_method_id)
        .bind(&input.receiver_account_id)
        .bind(auto_generate)
        .bind(input.recurrence_pattern.as_str())
        .bind(input.day_of_month)
        .bind(input.month_of_year)
        .bind(&input.start_date)
        .bind(&input.end_date)
        .bind(schedule::format_date(next_scheduled))
        .execute(&mut *tx)
        .await?;

        if let Some(participants) = &input.participants {
            insert_template_participants(&mut tx, &template_id, participants).await?;
        }
        tx.commit().await?;

        let template = templates::fetch_template(&pool, &member.household_id, &template_id).await?;
        let result = templates::with_participants(&pool, template).await?;

        audit.log(
            AuditEntry::new(AuditAction::TemplateCreated, ResourceType::RecurringTemplate)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&template_id)
                .new_values(&result.template),
        );

        Ok((StatusCode::CREATED, Json(result)))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn insert_template_participants(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    template_id: &str,
    participants: &[ParticipantInput],
) -> AppResult<()> {
    for p in participants {
        sqlx::query(
            "INSERT INTO recurring_template_participants
                (id, template_id, participant_user_id, participant_contact_id, percentage)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(template_id)
        .bind(&p.user_id)
        .bind(&p.contact_id)
        .bind(p.percentage)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn update_template(
    Path(template_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<UpdateTemplate>,
) -> AppResult<Json<TemplateWithParticipants>> {
    let attempt = AuditEntry::new(AuditAction::TemplateUpdated, ResourceType::RecurringTemplate)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let old = templates::fetch_template(&pool, &member.household_id, &template_id).await?;

        let name = input.name.unwrap_or_else(|| old.name.clone());
        if name.trim().is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }
        let description = input.description.or_else(|| old.description.clone());
        let amount = match input.amount {
            Some(amount) => validate_amount(amount)?,
            None => old.amount,
        };
        let category_id = input.category_id.unwrap_or_else(|| old.category_id.clone());
        let auto_generate = input.auto_generate.unwrap_or(old.auto_generate);
        let is_active = input.is_active.unwrap_or(old.is_active);

        let pattern = match input.recurrence_pattern {
            Some(pattern) => pattern,
            None => old
                .pattern()
                .ok_or_else(|| AppError::Internal("Patrón de recurrencia corrupto".to_string()))?,
        };
        let day_of_month = input.day_of_month.or(old.day_of_month);
        let month_of_year = input.month_of_year.or(old.month_of_year);
        let start_date = input.start_date.unwrap_or_else(|| old.start_date.clone());
        let end_date = input.end_date.or_else(|| old.end_date.clone());

        let schedule_changed = pattern.as_str() != old.recurrence_pattern
            || day_of_month != old.day_of_month
            || month_of_year != old.month_of_year
            || start_date != old.start_date
            || end_date != old.end_date;

        templates::validate_schedule(
            pattern,
            auto_generate,
            day_of_month,
            month_of_year,
            &start_date,
            end_date.as_deref(),
        )?;

        let payer_user_id = match (&input.payer_user_id, &input.payer_contact_id) {
            (None, None) => old.payer_user_id.clone(),
            _ => input.payer_user_id.clone(),
        };
        let payer_contact_id = match (&input.payer_user_id, &input.payer_contact_id) {
            (None, None) => old.payer_contact_id.clone(),
            _ => input.payer_contact_id.clone(),
        };
        let counterparty_user_id = match (&input.counterparty_user_id, &input.counterparty_contact_id)
        {
            (None, None) => old.counterparty_user_id.clone(),
            _ => input.counterparty_user_id.clone(),
        };
        let counterparty_contact_id =
            match (&input.counterparty_user_id, &input.counterparty_contact_id) {
                (None, None) => old.counterparty_contact_id.clone(),
                _ => input.counterparty_contact_id.clone(),
            };
        let payment_method_id = input
            .payment_method_id
            .or_else(|| old.payment_method_id.clone());
        let receiver_account_id = input
            .receiver_account_id
            .or_else(|| old.receiver_account_id.clone());

        let kind = old
            .kind()
            .ok_or_else(|| AppError::Internal("Tipo de movimiento corrupto".to_string()))?;

        let participants_for_validation: Vec<ParticipantInput> = match &input.participants {
            Some(participants) => participants.clone(),
            None => templates::fetch_participants(&pool, &template_id)
                .await?
                .into_iter()
                .map(|p| ParticipantInput {
                    user_id: p.participant_user_id,
                    contact_id: p.participant_contact_id,
                    percentage: p.percentage,
                })
                .collect(),
        };

        let category_for_validation = Some(category_id.clone());
        let shape = MovementShape {
            kind,
            payer_user_id: &payer_user_id,
            payer_contact_id: &payer_contact_id,
            counterparty_user_id: &counterparty_user_id,
            counterparty_contact_id: &counterparty_contact_id,
            category_id: &category_for_validation,
            payment_method_id: &payment_method_id,
            receiver_account_id: &receiver_account_id,
            participants: if kind == crate::models::MovementKind::Split {
                Some(participants_for_validation.as_slice())
            } else {
                None
            },
        };
        validate_shape(&pool, &member.household_id, &shape).await?;

        let next_scheduled_date = if schedule_changed {
            let start = schedule::parse_date(&start_date)
                .ok_or_else(|| AppError::Validation("Fecha de inicio inválida".to_string()))?;
            let last_generated = old
                .last_generated_date
                .as_deref()
                .and_then(schedule::parse_date);
            schedule::format_date(schedule::recompute_next(
                pattern,
                start,
                last_generated,
                day_of_month.map(|d| d as u32),
                month_of_year.map(|m| m as u32),
            ))
        } else {
            old.next_scheduled_date.clone()
        };

        let mut tx = pool.begin().await?;
        sqlx::query(
            "UPDATE recurring_templates SET
                name = ?, description = ?, category_id = ?, amount = ?,
                payer_user_id = ?, payer_contact_id = ?,
                counterparty_user_id = ?, counterparty_contact_id = ?,
                payment_method_id = ?, receiver_account_id = ?,
                auto_generate = ?, recurrence_pattern = ?, day_of_month = ?, month_of_year = ?,
                start_date = ?, end_date = ?, next_scheduled_date = ?, is_active = ?
             WHERE id = ?",
        )
        .bind(name.trim())
        .bind(&description)
        .bind(&category_id)
        .bind(amount)
        .bind(&payer_user_id)
        .bind(&payer_contact_id)
        .bind(&counterparty_user_id)
        .bind(&counterparty_contact_id)
        .bind(&payment_method_id)
        .bind(&receiver_account_id)
        .bind(auto_generate)
        .bind(pattern.as_str())
        .bind(day_of_month)
        .bind(month_of_year)
        .bind(&start_date)
        .bind(&end_date)
        .bind(&next_scheduled_date)
        .bind(is_active)
        .bind(&template_id)
        .execute(&mut *tx)
        .await?;

        if let Some(participants) = &input.participants {
            sqlx::query("DELETE FROM recurring_template_participants WHERE template_id = ?")
                .bind(&template_id)
                .execute(&mut *tx)
                .await?;
            insert_template_participants(&mut tx, &template_id, participants).await?;
        }
        tx.commit().await?;

        let template = templates::fetch_template(&pool, &member.household_id, &template_id).await?;
        let result = templates::with_participants(&pool, template).await?;

        let action = if old.is_active && !is_active {
            AuditAction::TemplateDeactivated
        } else if schedule_changed {
            AuditAction::TemplateScheduleUpdated
        } else {
            AuditAction::TemplateUpdated
        };

        audit.log(
            AuditEntry::new(action, ResourceType::RecurringTemplate)
                .user(&member.user_id)
                .household(&member.household_id)
                .resource(&template_id)
                .old(&old)
                .new_values(&result.template),
        );

        Ok(Json(result))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

async fn delete_template(
    Path(template_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Query(scope): Query<ScopeQuery>,
) -> AppResult<StatusCode> {
    let scope = match &scope.scope {
        Some(raw) => MutationScope::from_str(raw)
            .ok_or_else(|| AppError::Scope(format!("Alcance desconocido: {}", raw)))?,
        None => {
            return Err(AppError::Scope(
                "Indica el alcance (this, future o all) para eliminar la plantilla".to_string(),
            ))
        }
    };

    templates::delete_template(&pool, &audit, &member, &template_id, scope).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn prefill(
    Path(template_id): Path<String>,
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    Query(query): Query<PrefillQuery>,
) -> AppResult<Json<MovementPrefill>> {
    let template = templates::fetch_template(&pool, &member.household_id, &template_id).await?;
    let participants = templates::fetch_participants(&pool, &template_id).await?;

    let prefill = templates::build_prefill(
        &template,
        &participants,
        query.invert_roles.unwrap_or(false),
    );

    Ok(Json(prefill))
}

/// Manual trigger mirroring the background tick.
async fn generate_now(
    member: HouseholdMember,
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
) -> AppResult<Json<serde_json::Value>> {
    let attempt = AuditEntry::new(AuditAction::TemplateGenerationRun, ResourceType::RecurringTemplate)
        .user(&member.user_id)
        .household(&member.household_id);

    let result = async {
        let outcome = generator::run_generation(&pool, &audit).await?;

        audit.log(
            AuditEntry::new(AuditAction::TemplateGenerationRun, ResourceType::RecurringTemplate)
                .user(&member.user_id)
                .household(&member.household_id)
                .new_values(&json!({
                    "generated": outcome.generated,
                    "deactivated": outcome.deactivated,
                })),
        );

        Ok(Json(json!({
            "generated": outcome.generated,
            "deactivated": outcome.deactivated,
        })))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}
