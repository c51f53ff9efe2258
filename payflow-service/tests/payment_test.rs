//! Payment ledger integration tests for payflow-service.

mod common;

use common::{TestApp, id_of};
use serde_json::{Value, json};
use uuid::Uuid;

/// Invoice with a single line and no VAT: total 10000 cents.
async fn seed_plain_invoice(app: &TestApp, client_id: Uuid) -> Uuid {
    let invoice = app
        .seed_invoice(
            client_id,
            json!({
                "items": [
                    { "description": "Consulting", "quantity": 1, "unit_price": 10000 }
                ]
            }),
        )
        .await;
    id_of(&invoice, "invoice_id")
}

async fn post_payment(app: &TestApp, invoice_id: Uuid, amount: i64) -> reqwest::Response {
    app.client
        .post(app.url("/payments"))
        .json(&json!({
            "invoice_id": invoice_id,
            "amount": amount,
            "method": "card",
            "payment_date": "2026-01-20"
        }))
        .send()
        .await
        .expect("request failed")
}

async fn get_invoice(app: &TestApp, invoice_id: Uuid) -> Value {
    let response = app
        .client
        .get(app.url(&format!("/invoices/{}", invoice_id)))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);
    response.json().await.expect("invalid response")
}

#[tokio::test]
async fn full_payment_marks_invoice_paid() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, invoice_id, 10000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");

    assert_eq!(body["payment"]["amount"], 10000);
    assert_eq!(body["invoice"]["status"], "paid");
    assert_eq!(body["invoice"]["amount_paid"], 10000);
    assert_eq!(body["invoice"]["amount_due"], 0);

    app.cleanup().await;
}

#[tokio::test]
async fn partial_payment_keeps_invoice_sent() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, invoice_id, 4000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");

    assert_eq!(body["invoice"]["status"], "sent");
    assert_eq!(body["invoice"]["amount_paid"], 4000);
    assert_eq!(body["invoice"]["amount_due"], 6000);

    app.cleanup().await;
}

#[tokio::test]
async fn payment_on_draft_moves_it_to_sent() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice = app
        .seed_invoice(
            client_id,
            json!({
                "status": "draft",
                "items": [
                    { "description": "Consulting", "quantity": 1, "unit_price": 10000 }
                ]
            }),
        )
        .await;
    let invoice_id = id_of(&invoice, "invoice_id");

    let response = post_payment(&app, invoice_id, 2500).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["invoice"]["status"], "sent");

    app.cleanup().await;
}

#[tokio::test]
async fn overpayment_is_rejected_without_side_effects() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, invoice_id, 10001).await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(
        body["error"],
        "payment amount exceeds remaining invoice balance"
    );

    // The rejected payment left no trace.
    let invoice = get_invoice(&app, invoice_id).await;
    assert_eq!(invoice["amount_paid"], 0);
    assert_eq!(invoice["payments"].as_array().map(Vec::len), Some(0));

    app.cleanup().await;
}

#[tokio::test]
async fn accumulated_payments_respect_the_balance_invariant() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    assert_eq!(post_payment(&app, invoice_id, 4000).await.status(), 201);
    assert_eq!(post_payment(&app, invoice_id, 4000).await.status(), 201);

    // 8000 paid; 2001 more would exceed the total of 10000.
    assert_eq!(post_payment(&app, invoice_id, 2001).await.status(), 422);

    let response = post_payment(&app, invoice_id, 2000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["invoice"]["status"], "paid");

    // Once settled, even one more cent is rejected.
    assert_eq!(post_payment(&app, invoice_id, 1).await.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn end_to_end_invoice_settlement() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;

    let invoice = app
        .seed_invoice(
            client_id,
            json!({
                "vat_rate": "0.15",
                "items": [
                    { "description": "Consulting", "quantity": 2, "unit_price": 5000 }
                ]
            }),
        )
        .await;
    assert_eq!(invoice["subtotal"], 10000);
    assert_eq!(invoice["tax_amount"], 1500);
    assert_eq!(invoice["total"], 11500);
    assert_eq!(invoice["status"], "sent");
    let invoice_id = id_of(&invoice, "invoice_id");

    let response = post_payment(&app, invoice_id, 11500).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["invoice"]["status"], "paid");

    assert_eq!(post_payment(&app, invoice_id, 1).await.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn payment_against_missing_invoice_fails() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let response = post_payment(&app, Uuid::new_v4(), 1000).await;
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn non_positive_amount_fails_validation() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, invoice_id, 0).await;
    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn deleting_the_only_payment_reverts_status_to_sent() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, invoice_id, 10000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["invoice"]["status"], "paid");
    let payment_id = id_of(&body["payment"], "payment_id");

    let response = app
        .client
        .delete(app.url(&format!("/payments/{}", payment_id)))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 204);

    // Deleting payments moves status backward, but never back to draft.
    let invoice = get_invoice(&app, invoice_id).await;
    assert_eq!(invoice["status"], "sent");
    assert_eq!(invoice["amount_paid"], 0);
    assert_eq!(invoice["amount_due"], 10000);

    app.cleanup().await;
}

#[tokio::test]
async fn lowering_a_payment_amount_reopens_the_invoice() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, invoice_id, 10000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    let payment_id = id_of(&body["payment"], "payment_id");

    let response = app
        .client
        .put(app.url(&format!("/payments/{}", payment_id)))
        .json(&json!({ "amount": 6000 }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("invalid response");

    assert_eq!(body["payment"]["amount"], 6000);
    assert_eq!(body["invoice"]["status"], "sent");
    assert_eq!(body["invoice"]["amount_paid"], 6000);

    app.cleanup().await;
}

#[tokio::test]
async fn raising_a_payment_above_the_balance_is_rejected() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    assert_eq!(post_payment(&app, invoice_id, 4000).await.status(), 201);
    let response = post_payment(&app, invoice_id, 3000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    let payment_id = id_of(&body["payment"], "payment_id");

    // 4000 from the other payment + 7000 would exceed 10000.
    let response = app
        .client
        .put(app.url(&format!("/payments/{}", payment_id)))
        .json(&json!({ "amount": 7000 }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 422);

    // Raising to exactly the remaining balance settles the invoice.
    let response = app
        .client
        .put(app.url(&format!("/payments/{}", payment_id)))
        .json(&json!({ "amount": 6000 }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["invoice"]["status"], "paid");

    app.cleanup().await;
}

#[tokio::test]
async fn moving_a_payment_rebalances_both_invoices() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let first_invoice = seed_plain_invoice(&app, client_id).await;
    let second_invoice = seed_plain_invoice(&app, client_id).await;

    let response = post_payment(&app, first_invoice, 10000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["invoice"]["status"], "paid");
    let payment_id = id_of(&body["payment"], "payment_id");

    let response = app
        .client
        .put(app.url(&format!("/payments/{}", payment_id)))
        .json(&json!({ "invoice_id": second_invoice }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(id_of(&body["invoice"], "invoice_id"), second_invoice);
    assert_eq!(body["invoice"]["status"], "paid");

    // The source invoice reopened.
    let source = get_invoice(&app, first_invoice).await;
    assert_eq!(source["status"], "sent");
    assert_eq!(source["amount_paid"], 0);

    app.cleanup().await;
}

#[tokio::test]
async fn invoice_detail_lists_the_whole_ledger() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let invoice_id = seed_plain_invoice(&app, client_id).await;

    // More payments than one list page holds.
    for _ in 0..101 {
        assert_eq!(post_payment(&app, invoice_id, 1).await.status(), 201);
    }

    let invoice = get_invoice(&app, invoice_id).await;
    assert_eq!(invoice["payments"].as_array().map(Vec::len), Some(101));
    assert_eq!(invoice["amount_paid"], 101);

    app.cleanup().await;
}

#[tokio::test]
async fn list_payments_filters_by_invoice() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let client_id = app.seed_client().await;
    let first_invoice = seed_plain_invoice(&app, client_id).await;
    let second_invoice = seed_plain_invoice(&app, client_id).await;

    assert_eq!(post_payment(&app, first_invoice, 2000).await.status(), 201);
    assert_eq!(post_payment(&app, first_invoice, 3000).await.status(), 201);
    assert_eq!(post_payment(&app, second_invoice, 1000).await.status(), 201);

    let response = app
        .client
        .get(app.url(&format!("/payments?invoice_id={}", first_invoice)))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("invalid response");
    assert_eq!(body["payments"].as_array().map(Vec::len), Some(2));

    app.cleanup().await;
}
