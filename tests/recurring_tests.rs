mod common;

use axum::http::StatusCode;
use chrono::Datelike;
use serde_json::json;

use common::{create_test_app, TestApp};

struct Fixture {
    token: String,
    user_id: String,
    category_id: String,
    method_id: String,
    household_id: String,
}

async fn setup(app: &TestApp) -> Fixture {
    let (token, user_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Hogar").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;
    Fixture {
        token,
        user_id,
        category_id,
        method_id,
        household_id,
    }
}

#[tokio::test]
async fn test_create_computes_next_scheduled_date() {
    let app = create_test_app().await;
    let fx = setup(&app).await;

    let (status, body) = app
        .post(
            "/api/recurring-movements",
            &fx.token,
            json!({
                "name": "Arriendo",
                "category_id": fx.category_id,
                "movement_type": "HOUSEHOLD",
                "amount": 3200000,
                "payer_user_id": fx.user_id,
                "payment_method_id": fx.method_id,
                "auto_generate": false,
                "recurrence_pattern": "MONTHLY",
                "day_of_month": 5,
                "start_date": "2026-01-10",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    // Day 5 is already past on Jan 10, so the first occurrence is Feb 5
    assert_eq!(body["next_scheduled_date"], "2026-02-05");
}

#[tokio::test]
async fn test_monthly_template_rejects_day_29_and_up() {
    let app = create_test_app().await;
    let fx = setup(&app).await;

    for day in [29, 30, 31] {
        let (status, _) = app
            .post(
                "/api/recurring-movements",
                &fx.token,
                json!({
                    "name": "Inválida",
                    "category_id": fx.category_id,
                    "movement_type": "HOUSEHOLD",
                    "amount": 1000,
                    "payer_user_id": fx.user_id,
                    "payment_method_id": fx.method_id,
                    "auto_generate": true,
                    "recurrence_pattern": "MONTHLY",
                    "day_of_month": day,
                    "start_date": "2026-01-01",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "day {} accepted", day);
    }
}

#[tokio::test]
async fn test_legacy_amount_type_field_is_rejected() {
    let app = create_test_app().await;
    let fx = setup(&app).await;

    let (status, _) = app
        .post(
            "/api/recurring-movements",
            &fx.token,
            json!({
                "name": "Con campo legado",
                "category_id": fx.category_id,
                "movement_type": "HOUSEHOLD",
                "amount": 1000,
                "amount_type": "FIXED",
                "payer_user_id": fx.user_id,
                "payment_method_id": fx.method_id,
                "recurrence_pattern": "MONTHLY",
                "day_of_month": 1,
                "start_date": "2026-01-01",
            }),
        )
        .await;
    assert!(status.is_client_error(), "legacy payload accepted: {}", status);
}

#[tokio::test]
async fn test_prefill_and_role_inversion_law() {
    let app = create_test_app().await;
    let fx = setup(&app).await;
    let maria_id = app
        .create_contact(&fx.token, &fx.household_id, "Maria")
        .await;

    let (status, template) = app
        .post(
            "/api/recurring-movements",
            &fx.token,
            json!({
                "name": "Internet",
                "category_id": fx.category_id,
                "movement_type": "SPLIT",
                "amount": 90000,
                "payer_user_id": fx.user_id,
                "payment_method_id": fx.method_id,
                "recurrence_pattern": "MONTHLY",
                "day_of_month": 1,
                "start_date": "2026-01-01",
                "participants": [ { "contact_id": maria_id, "percentage": 1.0 } ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", template);
    let template_id = template["id"].as_str().unwrap().to_string();

    // Plain copy
    let (status, prefill) = app
        .get(
            &format!("/api/recurring-movements/prefill/{}", template_id),
            &fx.token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prefill["movement_type"], "SPLIT");
    assert_eq!(prefill["payer_user_id"], fx.user_id.as_str());
    assert_eq!(prefill["role_inversion_applied"], false);

    // Inverted: Maria settles her debt back to Jose
    let (status, inverted) = app
        .get(
            &format!(
                "/api/recurring-movements/prefill/{}?invert_roles=true",
                template_id
            ),
            &fx.token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inverted["movement_type"], "DEBT_PAYMENT");
    assert_eq!(inverted["payer_contact_id"], maria_id.as_str());
    assert_eq!(inverted["counterparty_user_id"], fx.user_id.as_str());
    assert_eq!(inverted["amount"], 90000.0);
    assert_eq!(inverted["role_inversion_applied"], true);
    assert_eq!(inverted["participants"].as_array().unwrap().len(), 0);

    // Submitting the inverted payload yields the promised debt payment
    let account_id = app.create_account(&fx.token, "Ahorros", 0.0).await;
    let (status, movement) = app
        .post(
            "/movements",
            &fx.token,
            json!({
                "movement_type": inverted["movement_type"],
                "description": inverted["description"],
                "amount": inverted["amount"],
                "category_id": inverted["category_id"],
                "payer_contact_id": inverted["payer_contact_id"],
                "counterparty_user_id": inverted["counterparty_user_id"],
                "receiver_account_id": account_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", movement);
    assert_eq!(movement["movement_type"], "DEBT_PAYMENT");
    assert_eq!(movement["payer_contact_id"], maria_id.as_str());
    assert_eq!(movement["counterparty_user_id"], fx.user_id.as_str());
    assert_eq!(movement["amount"], 90000.0);
}

#[tokio::test]
async fn test_generator_is_idempotent() {
    let app = create_test_app().await;
    let fx = setup(&app).await;

    // Due today regardless of when the test runs
    let today = chrono::Utc::now().date_naive();
    let day = today.day().min(28);
    let start = today.with_day(day).unwrap();

    let (status, template) = app
        .post(
            "/api/recurring-movements",
            &fx.token,
            json!({
                "name": "Arriendo",
                "category_id": fx.category_id,
                "movement_type": "HOUSEHOLD",
                "amount": 3200000,
                "payer_user_id": fx.user_id,
                "payment_method_id": fx.method_id,
                "auto_generate": true,
                "recurrence_pattern": "MONTHLY",
                "day_of_month": day,
                "start_date": start.format("%Y-%m-%d").to_string(),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", template);
    let template_id = template["id"].as_str().unwrap().to_string();
    assert_eq!(
        template["next_scheduled_date"],
        start.format("%Y-%m-%d").to_string()
    );

    let (status, first) = app
        .post("/api/recurring-movements/generate", &fx.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(first["generated"], 1);

    let (_, second) = app
        .post("/api/recurring-movements/generate", &fx.token, json!({}))
        .await;
    assert_eq!(second["generated"], 0);

    let generated: Vec<(String,)> = sqlx::query_as(
        "SELECT movement_date FROM movements WHERE generated_from_template_id = ?",
    )
    .bind(&template_id)
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].0, start.format("%Y-%m-%d").to_string());

    let next: String = sqlx::query_scalar(
        "SELECT next_scheduled_date FROM recurring_templates WHERE id = ?",
    )
    .bind(&template_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    let expected_next = start + chrono::Months::new(1);
    assert_eq!(next, expected_next.format("%Y-%m-%d").to_string());

    app.wait_for_audit("MOVEMENT_AUTO_GENERATED", 1).await;
}

#[tokio::test]
async fn test_scope_future_edit_propagates_to_siblings_and_template() {
    let app = create_test_app().await;
    let fx = setup(&app).await;

    let (status, template) = app
        .post(
            "/api/recurring-movements",
            &fx.token,
            json!({
                "name": "Arriendo",
                "category_id": fx.category_id,
                "movement_type": "HOUSEHOLD",
                "amount": 3200000,
                "payer_user_id": fx.user_id,
                "payment_method_id": fx.method_id,
                "auto_generate": true,
                "recurrence_pattern": "MONTHLY",
                "day_of_month": 1,
                "start_date": "2026-01-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", template);
    let template_id = template["id"].as_str().unwrap().to_string();

    // Three passes materialize Jan, Feb and Mar 2026
    for _ in 0..3 {
        let (status, _) = app
            .post("/api/recurring-movements/generate", &fx.token, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let generated: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, movement_date FROM movements
         WHERE generated_from_template_id = ? ORDER BY movement_date ASC",
    )
    .bind(&template_id)
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(generated.len(), 3);
    assert_eq!(generated[0].1, "2026-01-01");
    assert_eq!(generated[1].1, "2026-02-01");
    assert_eq!(generated[2].1, "2026-03-01");

    // A generated movement demands an explicit scope
    let (status, _) = app
        .patch(
            &format!("/movements/{}", generated[1].0),
            &fx.token,
            json!({ "amount": 3300000 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .patch(
            &format!("/movements/{}?scope=future", generated[1].0),
            &fx.token,
            json!({ "amount": 3300000 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let amounts: Vec<(String, f64)> = sqlx::query_as(
        "SELECT movement_date, amount FROM movements
         WHERE generated_from_template_id = ? ORDER BY movement_date ASC",
    )
    .bind(&template_id)
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(amounts[0], ("2026-01-01".to_string(), 3200000.0));
    assert_eq!(amounts[1], ("2026-02-01".to_string(), 3300000.0));
    assert_eq!(amounts[2], ("2026-03-01".to_string(), 3300000.0));

    let template_amount: f64 =
        sqlx::query_scalar("SELECT amount FROM recurring_templates WHERE id = ?")
            .bind(&template_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(template_amount, 3300000.0);
}

#[tokio::test]
async fn test_template_delete_scope_all_removes_generated_movements() {
    let app = create_test_app().await;
    let fx = setup(&app).await;

    let (status, template) = app
        .post(
            "/api/recurring-movements",
            &fx.token,
            json!({
                "name": "Suscripción",
                "category_id": fx.category_id,
                "movement_type": "HOUSEHOLD",
                "amount": 35000,
                "payer_user_id": fx.user_id,
                "payment_method_id": fx.method_id,
                "auto_generate": true,
                "recurrence_pattern": "MONTHLY",
                "day_of_month": 1,
                "start_date": "2026-01-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", template);
    let template_id = template["id"].as_str().unwrap().to_string();

    app.post("/api/recurring-movements/generate", &fx.token, json!({}))
        .await;

    // Scope is mandatory for template deletion too
    let (status, _) = app
        .delete(
            &format!("/api/recurring-movements/{}", template_id),
            &fx.token,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .delete(
            &format!("/api/recurring-movements/{}?scope=all", template_id),
            &fx.token,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM movements WHERE generated_from_template_id = ?")
            .bind(&template_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    let templates: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM recurring_templates WHERE id = ?")
            .bind(&template_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(templates, 0);
}
