mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::create_test_app;

#[tokio::test]
async fn test_household_expense_end_to_end() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "Débito Jose", true).await;

    let (status, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Mercado quincenal",
                "amount": 250000,
                "category_id": category_id,
                "movement_date": "2026-01-15",
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["payer_name"], "Jose");
    assert_eq!(body["payment_method_name"], "Débito Jose");
    assert_eq!(body["category_name"], "Mercado");
    assert_eq!(body["amount"], 250000.0);

    // Exactly one MOVEMENT_CREATED entry with the full snapshot
    let count = app.wait_for_audit("MOVEMENT_CREATED", 1).await;
    assert_eq!(count, 1);
    let new_values: String = sqlx::query_scalar(
        "SELECT new_values FROM audit_logs WHERE action = 'MOVEMENT_CREATED'",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&new_values).unwrap();
    assert_eq!(snapshot["amount"], 250000.0);
}

#[tokio::test]
async fn test_household_expense_requires_category_and_method() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;

    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Sin categoría",
                "amount": 1000,
                "payer_user_id": jose_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Sin medio de pago",
                "amount": 1000,
                "category_id": category_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_split_percentage_tolerance_boundaries() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "AMEX", true).await;
    let maria_id = app.create_contact(&token, &household_id, "Maria").await;

    let split = |p1: f64, p2: f64| {
        json!({
            "movement_type": "SPLIT",
            "description": "Mercado",
            "amount": 120000,
            "category_id": category_id,
            "payer_user_id": jose_id,
            "payment_method_id": method_id,
            "participants": [
                { "user_id": jose_id, "percentage": p1 },
                { "contact_id": maria_id, "percentage": p2 },
            ],
        })
    };

    // 0.9999 is inside the tolerance
    let (status, body) = app.post("/movements", &token, split(0.5, 0.4999)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    // 0.999 is outside
    let (status, _) = app.post("/movements", &token, split(0.5, 0.499)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_split_rejects_duplicate_participants() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "AMEX", true).await;

    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "SPLIT",
                "description": "Duplicado",
                "amount": 1000,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
                "participants": [
                    { "user_id": jose_id, "percentage": 0.5 },
                    { "user_id": jose_id, "percentage": 0.5 },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_debt_payment_rejects_same_payer_and_counterparty() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;
    let account_id = app.create_account(&token, "Ahorros", 0.0).await;

    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "DEBT_PAYMENT",
                "description": "A mí mismo",
                "amount": 1000,
                "payer_user_id": jose_id,
                "counterparty_user_id": jose_id,
                "payment_method_id": method_id,
                "receiver_account_id": account_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_debt_payment_credits_receiver_account() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let maria_id = app.create_contact(&token, &household_id, "Maria").await;
    let account_id = app.create_account(&token, "Ahorros Jose", 100000.0).await;

    // Counterparty is a member, so the receiver account is mandatory
    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "DEBT_PAYMENT",
                "description": "Pago sin cuenta",
                "amount": 50000,
                "payer_contact_id": maria_id,
                "counterparty_user_id": jose_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "DEBT_PAYMENT",
                "description": "Maria paga su parte",
                "amount": 50000,
                "payer_contact_id": maria_id,
                "counterparty_user_id": jose_id,
                "receiver_account_id": account_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let movement_id = body["id"].as_str().unwrap().to_string();

    let (_, account) = app.get(&format!("/accounts/{}", account_id), &token).await;
    assert_eq!(account["current_balance"], 150000.0);

    // Amount change adjusts the balance by the delta
    let (status, _) = app
        .patch(
            &format!("/movements/{}", movement_id),
            &token,
            json!({ "amount": 70000 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, account) = app.get(&format!("/accounts/{}", account_id), &token).await;
    assert_eq!(account["current_balance"], 170000.0);

    // Delete reverses the posting
    let (status, _) = app
        .delete(&format!("/movements/{}", movement_id), &token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, account) = app.get(&format!("/accounts/{}", account_id), &token).await;
    assert_eq!(account["current_balance"], 100000.0);
}

#[tokio::test]
async fn test_amount_rounds_half_even_to_cents() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;

    let (status, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Redondeo",
                "amount": 10.015,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["amount"], 10.02);

    // Rounds to zero, then fails the amount invariant
    let (status, _) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Cero",
                "amount": 0.004,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_after_delete_returns_not_found() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;

    let (_, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Temporal",
                "amount": 1000,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;
    let movement_id = body["id"].as_str().unwrap().to_string();

    let (status, fetched) = app.get(&format!("/movements/{}", movement_id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], movement_id.as_str());
    assert_eq!(fetched["amount"], 1000.0);

    let (status, _) = app
        .delete(&format!("/movements/{}", movement_id), &token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/movements/{}", movement_id), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_patch_is_a_no_op_without_audit() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;

    let (_, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Fijo",
                "amount": 1000,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;
    let movement_id = body["id"].as_str().unwrap().to_string();
    app.wait_for_audit("MOVEMENT_CREATED", 1).await;

    let (status, unchanged) = app
        .patch(&format!("/movements/{}", movement_id), &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unchanged["amount"], 1000.0);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let updates: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = 'MOVEMENT_UPDATED'")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(updates, 0);
}

#[tokio::test]
async fn test_movements_outside_household_are_invisible() {
    let app = create_test_app().await;
    let (jose_token, jose_id) = app.register("jose@example.com", "Jose").await;
    app.create_household(&jose_token, "H1").await;
    let category_id = app.create_category(&jose_token, "Mercado").await;
    let method_id = app.create_payment_method(&jose_token, "Débito", true).await;

    let (_, body) = app
        .post(
            "/movements",
            &jose_token,
            json!({
                "movement_type": "HOUSEHOLD",
                "description": "Privado",
                "amount": 1000,
                "category_id": category_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
            }),
        )
        .await;
    let movement_id = body["id"].as_str().unwrap().to_string();

    let (ana_token, _) = app.register("ana@example.com", "Ana").await;
    app.create_household(&ana_token, "H2").await;

    let (status, _) = app
        .get(&format!("/movements/{}", movement_id), &ana_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expenses_projection_hides_loan_category() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let mercado_id = app.create_category(&token, "Mercado").await;
    let prestamo_id = app.create_category(&token, "Préstamo").await;
    let method_id = app.create_payment_method(&token, "Débito", true).await;
    let maria_id = app.create_contact(&token, &household_id, "Maria").await;

    app.post(
        "/movements",
        &token,
        json!({
            "movement_type": "HOUSEHOLD",
            "description": "Mercado",
            "amount": 1000,
            "category_id": mercado_id,
            "payer_user_id": jose_id,
            "payment_method_id": method_id,
        }),
    )
    .await;

    let (status, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "SPLIT",
                "description": "Préstamo a Maria",
                "amount": 5000,
                "category_id": prestamo_id,
                "payer_user_id": jose_id,
                "payment_method_id": method_id,
                "participants": [ { "contact_id": maria_id, "percentage": 1.0 } ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (_, expenses) = app.get("/movements?projection=expenses", &token).await;
    assert_eq!(expenses.as_array().unwrap().len(), 1);
    assert_eq!(expenses[0]["description"], "Mercado");

    let (_, debts) = app.get("/movements?projection=debts", &token).await;
    assert_eq!(debts.as_array().unwrap().len(), 1);
    assert_eq!(debts[0]["description"], "Préstamo a Maria");
}
