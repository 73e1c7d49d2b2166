mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{create_test_app, TestApp};

async fn split(
    app: &TestApp,
    token: &str,
    amount: f64,
    date: &str,
    category_id: &str,
    method_id: Option<&str>,
    payer: (&str, &str),
    participants: Vec<(&str, &str, f64)>,
) -> String {
    let mut body = json!({
        "movement_type": "SPLIT",
        "description": "Gasto compartido",
        "amount": amount,
        "movement_date": date,
        "category_id": category_id,
        "participants": participants
            .iter()
            .map(|(kind, id, pct)| json!({ (*kind): id, "percentage": pct }))
            .collect::<Vec<_>>(),
    });
    body[payer.0] = json!(payer.1);
    if let Some(method_id) = method_id {
        body["payment_method_id"] = json!(method_id);
    }

    let (status, response) = app.post("/movements", token, body).await;
    assert_eq!(status, StatusCode::CREATED, "{}", response);
    response["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_split_with_contact_produces_single_balance() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "AMEX", true).await;
    let maria_id = app.create_contact(&token, &household_id, "Maria").await;

    split(
        &app,
        &token,
        120000.0,
        "2026-01-10",
        &category_id,
        Some(&method_id),
        ("payer_user_id", &jose_id),
        vec![
            ("user_id", jose_id.as_str(), 0.5),
            ("contact_id", maria_id.as_str(), 0.5),
        ],
    )
    .await;

    let (status, body) = app.get("/movements/debts/consolidate", &token).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let balances = body["balances"].as_array().unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0]["debtor_id"], maria_id.as_str());
    assert_eq!(balances[0]["debtor_name"], "Maria");
    assert_eq!(balances[0]["creditor_id"], jose_id.as_str());
    assert_eq!(balances[0]["amount"], 60000.0);
    assert_eq!(balances[0]["is_cross_household"], false);
    assert_eq!(balances[0]["movements"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_debt_payment_cancels_prior_debt() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "AMEX", true).await;
    let maria_id = app.create_contact(&token, &household_id, "Maria").await;
    let account_id = app.create_account(&token, "Ahorros", 0.0).await;

    split(
        &app,
        &token,
        120000.0,
        "2026-01-10",
        &category_id,
        Some(&method_id),
        ("payer_user_id", &jose_id),
        vec![
            ("user_id", jose_id.as_str(), 0.5),
            ("contact_id", maria_id.as_str(), 0.5),
        ],
    )
    .await;

    let (status, body) = app
        .post(
            "/movements",
            &token,
            json!({
                "movement_type": "DEBT_PAYMENT",
                "description": "Maria se pone al día",
                "amount": 60000,
                "movement_date": "2026-01-20",
                "payer_contact_id": maria_id,
                "counterparty_user_id": jose_id,
                "receiver_account_id": account_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (_, body) = app.get("/movements/debts/consolidate", &token).await;
    assert_eq!(body["balances"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_consolidation_is_deterministic_and_month_scoped() {
    let app = create_test_app().await;
    let (token, jose_id) = app.register("jose@example.com", "Jose").await;
    let household_id = app.create_household(&token, "H1").await;
    let category_id = app.create_category(&token, "Mercado").await;
    let method_id = app.create_payment_method(&token, "AMEX", true).await;
    let maria_id = app.create_contact(&token, &household_id, "Maria").await;

    split(
        &app,
        &token,
        100000.0,
        "2026-01-10",
        &category_id,
        Some(&method_id),
        ("payer_user_id", &jose_id),
        vec![("contact_id", maria_id.as_str(), 1.0)],
    )
    .await;
    split(
        &app,
        &token,
        50000.0,
        "2026-02-05",
        &category_id,
        Some(&method_id),
        ("payer_user_id", &jose_id),
        vec![("contact_id", maria_id.as_str(), 1.0)],
    )
    .await;

    let (_, first) = app.get("/movements/debts/consolidate", &token).await;
    let (_, second) = app.get("/movements/debts/consolidate", &token).await;
    assert_eq!(first, second);
    assert_eq!(first["balances"][0]["amount"], 150000.0);

    let (_, january) = app
        .get("/movements/debts/consolidate?month=2026-01", &token)
        .await;
    assert_eq!(january["balances"][0]["amount"], 100000.0);
    assert_eq!(january["balances"][0]["movements"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cross_household_debt_visibility() {
    let app = create_test_app().await;
    let (jose_token, jose_id) = app.register("jose@example.com", "Jose").await;
    let (maria_token, maria_user_id) = app.register("maria@example.com", "Maria").await;

    let h1 = app.create_household(&jose_token, "Casa Jose").await;
    app.create_household(&maria_token, "Casa Maria").await;

    let category_id = app.create_category(&jose_token, "Hogar").await;
    let method_id = app.create_payment_method(&jose_token, "Débito", true).await;

    // Jose's household-local contact for Maria, linked to her account
    let (status, contact) = app
        .post(
            &format!("/households/{}/contacts", h1),
            &jose_token,
            json!({ "display_name": "Maria", "linked_user_id": maria_user_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", contact);
    let maria_contact_id = contact["id"].as_str().unwrap().to_string();

    split(
        &app,
        &jose_token,
        2_000_000.0,
        "2026-03-01",
        &category_id,
        Some(&method_id),
        ("payer_user_id", &jose_id),
        vec![
            ("user_id", jose_id.as_str(), 0.5),
            ("contact_id", maria_contact_id.as_str(), 0.5),
        ],
    )
    .await;
    split(
        &app,
        &jose_token,
        400_000.0,
        "2026-03-05",
        &category_id,
        None,
        ("payer_contact_id", &maria_contact_id),
        vec![
            ("user_id", jose_id.as_str(), 0.5),
            ("contact_id", maria_contact_id.as_str(), 0.5),
        ],
    )
    .await;

    // From Maria's perspective the contact translates to her user id
    let (status, body) = app
        .get("/movements/debts/consolidate", &maria_token)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let balances = body["balances"].as_array().unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0]["is_cross_household"], true);
    assert_eq!(balances[0]["debtor_id"], maria_user_id.as_str());
    assert_eq!(balances[0]["creditor_id"], jose_id.as_str());
    assert_eq!(balances[0]["amount"], 800_000.0);
    let movements = balances[0]["movements"].as_array().unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0]["source_household_name"], "Casa Jose");

    // Unlinking the contact removes the cross-household balances
    let (status, _) = app
        .patch(
            &format!("/households/{}/contacts/{}", h1, maria_contact_id),
            &jose_token,
            json!({ "linked_user_id": "" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .get("/movements/debts/consolidate", &maria_token)
        .await;
    assert_eq!(body["balances"].as_array().unwrap().len(), 0);
}
