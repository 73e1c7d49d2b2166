use sqlx::SqlitePool;

use crate::auth::HouseholdMember;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuditAction, AuditEntry, Movement, MovementKind, MovementPrefill, MutationScope,
    ParticipantInput, RecurrencePattern, RecurringTemplate, RecurringTemplateParticipant,
    ResourceType, TemplateWithParticipants,
};
use crate::services::audit::AuditHandle;
use crate::services::{movements, schedule};

/// Schedule-field validation shared by create and update. Day 29–31 has no
/// stable monthly anchor and is rejected outright.
pub fn validate_schedule(
    pattern: RecurrencePattern,
    auto_generate: bool,
    day_of_month: Option<i64>,
    month_of_year: Option<i64>,
    start_date: &str,
    end_date: Option<&str>,
) -> AppResult<()> {
    if auto_generate && pattern == RecurrencePattern::OneTime {
        return Err(AppError::Validation(
            "Una plantilla de única vez no puede generarse automáticamente".to_string(),
        ));
    }

    match pattern {
        RecurrencePattern::Monthly => {
            let day = day_of_month.ok_or_else(|| {
                AppError::Validation("El día del mes es obligatorio".to_string())
            })?;
            if !(1..=28).contains(&day) {
                return Err(AppError::Validation(
                    "El día del mes debe estar entre 1 y 28".to_string(),
                ));
            }
        }
        RecurrencePattern::Yearly => {
            let month = month_of_year.ok_or_else(|| {
                AppError::Validation("El mes del año es obligatorio".to_string())
            })?;
            if !(1..=12).contains(&month) {
                return Err(AppError::Validation(
                    "El mes del año debe estar entre 1 y 12".to_string(),
                ));
            }
            let day = day_of_month.ok_or_else(|| {
                AppError::Validation("El día del mes es obligatorio".to_string())
            })?;
            if !(1..=28).contains(&day) {
                return Err(AppError::Validation(
                    "El día del mes debe estar entre 1 y 28".to_string(),
                ));
            }
        }
        RecurrencePattern::OneTime => {}
    }

    let start = schedule::parse_date(start_date)
        .ok_or_else(|| AppError::Validation("Fecha de inicio inválida".to_string()))?;

    if let Some(end_date) = end_date {
        let end = schedule::parse_date(end_date)
            .ok_or_else(|| AppError::Validation("Fecha de fin inválida".to_string()))?;
        if end < start {
            return Err(AppError::Validation(
                "La fecha de fin debe ser posterior al inicio".to_string(),
            ));
        }
    }

    Ok(())
}

pub async fn fetch_template(
    pool: &SqlitePool,
    household_id: &str,
    template_id: &str,
) -> AppResult<RecurringTemplate> {
    let template: Option<RecurringTemplate> =
        sqlx::query_as("SELECT * FROM recurring_templates WHERE id = ? AND household_id = ?")
            .bind(template_id)
            .bind(household_id)
            .fetch_optional(pool)
            .await?;
    template.ok_or_else(|| AppError::NotFound("Plantilla no encontrada".to_string()))
}

pub async fn fetch_participants(
    pool: &SqlitePool,
    template_id: &str,
) -> AppResult<Vec<RecurringTemplateParticipant>> {
    Ok(sqlx::query_as(
        "SELECT * FROM recurring_template_participants WHERE template_id = ?
         ORDER BY percentage DESC, id ASC",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?)
}

pub async fn with_participants(
    pool: &SqlitePool,
    template: RecurringTemplate,
) -> AppResult<TemplateWithParticipants> {
    let participants = fetch_participants(pool, &template.id).await?;
    Ok(TemplateWithParticipants {
        template,
        participants,
    })
}

/// Pre-fill payload for manual entry. With `invert_roles`, a SPLIT template
/// with a single participant R becomes a DEBT_PAYMENT from R back to the
/// template's payer; any other combination falls back to the plain copy with
/// `role_inversion_applied = false`.
pub fn build_prefill(
    template: &RecurringTemplate,
    participants: &[RecurringTemplateParticipant],
    invert_roles: bool,
) -> MovementPrefill {
    if invert_roles && template.kind() == Some(MovementKind::Split) && participants.len() == 1 {
        let settler = &participants[0];
        return MovementPrefill {
            movement_type: MovementKind::DebtPayment,
            description: template
                .description
                .clone()
                .unwrap_or_else(|| template.name.clone()),
            amount: template.amount,
            currency_code: template.currency_code.clone(),
            category_id: Some(template.category_id.clone()),
            payer_user_id: settler.participant_user_id.clone(),
            payer_contact_id: settler.participant_contact_id.clone(),
            counterparty_user_id: template.payer_user_id.clone(),
            counterparty_contact_id: template.payer_contact_id.clone(),
            payment_method_id: None,
            receiver_account_id: None,
            participants: Vec::new(),
            role_inversion_applied: true,
        };
    }

    let kind = template.kind().unwrap_or(MovementKind::Household);
    MovementPrefill {
        movement_type: kind,
        description: template
            .description
            .clone()
            .unwrap_or_else(|| template.name.clone()),
        amount: template.amount,
        currency_code: template.currency_code.clone(),
        category_id: Some(template.category_id.clone()),
        payer_user_id: template.payer_user_id.clone(),
        payer_contact_id: template.payer_contact_id.clone(),
        counterparty_user_id: template.counterparty_user_id.clone(),
        counterparty_contact_id: template.counterparty_contact_id.clone(),
        payment_method_id: template.payment_method_id.clone(),
        receiver_account_id: template.receiver_account_id.clone(),
        participants: participants
            .iter()
            .map(|p| ParticipantInput {
                user_id: p.participant_user_id.clone(),
                contact_id: p.participant_contact_id.clone(),
                percentage: p.percentage,
            })
            .collect(),
        role_inversion_applied: false,
    }
}

/// Delete a template honouring the mutation scope:
/// - this: the template row alone; generated movements keep their weak ref
/// - future: deactivate the template and remove generated movements from
///   today onward
/// - all: remove the template and everything it ever generated
pub async fn delete_template(
    pool: &SqlitePool,
    audit: &AuditHandle,
    member: &HouseholdMember,
    template_id: &str,
    scope: MutationScope,
) -> AppResult<()> {
    let template = fetch_template(pool, &member.household_id, template_id).await?;

    let result = delete_inner(pool, &template, scope).await;

    match result {
        Ok(()) => {
            audit.log(
                AuditEntry::new(AuditAction::TemplateDeleted, ResourceType::RecurringTemplate)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(template_id)
                    .old(&template),
            );
            Ok(())
        }
        Err(e) => {
            audit.log(
                AuditEntry::new(AuditAction::TemplateDeleted, ResourceType::RecurringTemplate)
                    .user(&member.user_id)
                    .household(&member.household_id)
                    .resource(template_id)
                    .failed(&e.to_string()),
            );
            Err(e)
        }
    }
}

async fn delete_inner(
    pool: &SqlitePool,
    template: &RecurringTemplate,
    scope: MutationScope,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    match scope {
        MutationScope::This => {
            sqlx::query("DELETE FROM recurring_templates WHERE id = ?")
                .bind(&template.id)
                .execute(&mut *tx)
                .await?;
        }
        MutationScope::Future => {
            let cutoff = schedule::format_date(schedule::today());
            let future: Vec<Movement> = sqlx::query_as(
                "SELECT * FROM movements
                 WHERE generated_from_template_id = ? AND movement_date >= ?",
            )
            .bind(&template.id)
            .bind(&cutoff)
            .fetch_all(&mut *tx)
            .await?;

            for movement in &future {
                movements::delete_one(&mut tx, movement).await?;
            }

            sqlx::query("UPDATE recurring_templates SET is_active = 0 WHERE id = ?")
                .bind(&template.id)
                .execute(&mut *tx)
                .await?;
        }
        MutationScope::All => {
            let generated: Vec<Movement> =
                sqlx::query_as("SELECT * FROM movements WHERE generated_from_template_id = ?")
                    .bind(&template.id)
                    .fetch_all(&mut *tx)
                    .await?;

            for movement in &generated {
                movements::delete_one(&mut tx, movement).await?;
            }

            sqlx::query("DELETE FROM recurring_templates WHERE id = ?")
                .bind(&template.id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(kind: &str) -> RecurringTemplate {
        RecurringTemplate {
            id: "t1".to_string(),
            household_id: "h1".to_string(),
            name: "Arriendo".to_string(),
            description: None,
            category_id: "cat1".to_string(),
            movement_type: kind.to_string(),
            amount: 3_200_000.0,
            currency_code: "COP".to_string(),
            payer_user_id: Some("jose".to_string()),
            payer_contact_id: None,
            counterparty_user_id: None,
            counterparty_contact_id: None,
            payment_method_id: Some("pm1".to_string()),
            receiver_account_id: None,
            auto_generate: true,
            recurrence_pattern: "MONTHLY".to_string(),
            day_of_month: Some(1),
            month_of_year: None,
            start_date: "2026-01-01".to_string(),
            end_date: None,
            last_generated_date: None,
            next_scheduled_date: "2026-01-01".to_string(),
            is_active: true,
            created_at: String::new(),
        }
    }

    fn participant(user_id: Option<&str>, contact_id: Option<&str>, pct: f64) -> RecurringTemplateParticipant {
        RecurringTemplateParticipant {
            id: "p1".to_string(),
            template_id: "t1".to_string(),
            participant_user_id: user_id.map(String::from),
            participant_contact_id: contact_id.map(String::from),
            percentage: pct,
        }
    }

    #[test]
    fn test_prefill_inverts_single_participant_split() {
        let t = template("SPLIT");
        let participants = vec![participant(None, Some("maria"), 1.0)];

        let prefill = build_prefill(&t, &participants, true);

        assert_eq!(prefill.movement_type, MovementKind::DebtPayment);
        assert_eq!(prefill.payer_contact_id.as_deref(), Some("maria"));
        assert!(prefill.payer_user_id.is_none());
        assert_eq!(prefill.counterparty_user_id.as_deref(), Some("jose"));
        assert_eq!(prefill.amount, 3_200_000.0);
        assert!(prefill.participants.is_empty());
        assert!(prefill.role_inversion_applied);
    }

    #[test]
    fn test_prefill_inversion_falls_back_with_two_participants() {
        let t = template("SPLIT");
        let participants = vec![
            participant(Some("jose"), None, 0.5),
            participant(None, Some("maria"), 0.5),
        ];

        let prefill = build_prefill(&t, &participants, true);

        assert_eq!(prefill.movement_type, MovementKind::Split);
        assert_eq!(prefill.participants.len(), 2);
        assert!(!prefill.role_inversion_applied);
    }

    #[test]
    fn test_prefill_inversion_falls_back_for_household_template() {
        let t = template("HOUSEHOLD");
        let prefill = build_prefill(&t, &[], true);

        assert_eq!(prefill.movement_type, MovementKind::Household);
        assert!(!prefill.role_inversion_applied);
    }

    #[test]
    fn test_prefill_plain_copy() {
        let t = template("SPLIT");
        let participants = vec![participant(None, Some("maria"), 1.0)];

        let prefill = build_prefill(&t, &participants, false);

        assert_eq!(prefill.movement_type, MovementKind::Split);
        assert_eq!(prefill.payer_user_id.as_deref(), Some("jose"));
        assert_eq!(prefill.participants.len(), 1);
        assert!(!prefill.role_inversion_applied);
    }

    #[test]
    fn test_schedule_rejects_day_29_and_up() {
        for day in [29, 30, 31] {
            let result = validate_schedule(
                RecurrencePattern::Monthly,
                true,
                Some(day),
                None,
                "2026-01-01",
                None,
            );
            assert!(result.is_err(), "day {} should be rejected", day);
        }
    }

    #[test]
    fn test_schedule_accepts_day_28() {
        assert!(validate_schedule(
            RecurrencePattern::Monthly,
            true,
            Some(28),
            None,
            "2026-01-01",
            None,
        )
        .is_ok());
    }

    #[test]
    fn test_schedule_rejects_auto_generate_one_time() {
        let result = validate_schedule(
            RecurrencePattern::OneTime,
            true,
            None,
            None,
            "2026-01-01",
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_schedule_rejects_end_before_start() {
        let result = validate_schedule(
            RecurrencePattern::Monthly,
            false,
            Some(1),
            None,
            "2026-05-01",
            Some("2026-01-01"),
        );
        assert!(result.is_err());
    }
}
