mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{
    app, app_with_chain, app_with_webhook_id, config, request, send, state_with,
    with_paypal_headers, FakeChain, FakePayPal, ETH_WALLET,
};
use hope_foundation_api::{
    crypto_client::{Asset, TxStatus},
    donation::{DonationRequest, DonorInfo, DONATIONS, DONORS},
    notifications::NOTIFICATIONS,
    payment_service::{process_donation, CARD_UNAVAILABLE},
    store::{to_row, Database, DbClients, Filter, MemoryDatabase, Query},
};
use std::sync::Arc;

fn paypal_donation(amount: f64) -> Value {
    json!({
        "amount": amount,
        "currency": "USD",
        "donationType": "one-time",
        "paymentMethod": "paypal",
        "donorName": "Ada Lovelace",
        "donorEmail": "ada@example.org",
        "message": "For the school",
    })
}

#[tokio::test]
async fn amount_below_one_never_reaches_paypal() {
    let (app, db, paypal) = app();

    let (status, body) = send(
        &app,
        request("POST", "/api/donations", None, Some(paypal_donation(0.5))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(paypal.calls().is_empty());
    assert_eq!(db.count(DONATIONS).await, 0);
}

#[tokio::test]
async fn card_payments_fail_fast() {
    let (app, _, paypal) = app();
    let mut donation = paypal_donation(10.0);
    donation["paymentMethod"] = json!("card");

    let (status, body) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Card payments are not yet available");
    assert!(paypal.calls().is_empty());
}

#[tokio::test]
async fn one_time_donation_returns_approval_url_and_pending_record() {
    let (app, db, paypal) = app();

    let (status, body) = send(
        &app,
        request("POST", "/api/donations", None, Some(paypal_donation(25.0))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["paymentId"], "ORDER-1");
    assert!(body["approvalUrl"].as_str().unwrap().contains("ORDER-1"));
    assert_eq!(paypal.count("create_order"), 1);

    let rows = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "pending");
    assert_eq!(rows[0]["tx_reference"], "ORDER-1");
}

#[tokio::test]
async fn verify_captures_approved_order_once() {
    let (app, db, paypal) = app();
    let (status, checkout) = send(
        &app,
        request("POST", "/api/payments/paypal", None, Some(paypal_donation(25.0))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checkout["orderID"], "ORDER-1");
    assert!(checkout.get("subscriptionID").is_none());

    let verify = || request("POST", "/api/payments/verify", None, Some(json!({ "orderId": "ORDER-1" })));
    let (status, body) = send(&app, verify()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["transactionId"], "CAPTURE-1");
    assert_eq!(body["amount"], 25.0);

    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations.len(), 1);
    assert_eq!(donations[0]["status"], "completed");
    assert_eq!(db.count(DONORS).await, 1);
    assert_eq!(db.count(NOTIFICATIONS).await, 1);

    // Already completed: no second capture.
    let (status, _) = send(&app, verify()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paypal.count("capture_order"), 1);
    assert_eq!(db.count(DONORS).await, 1);
}

#[tokio::test]
async fn unapproved_order_is_a_provider_error_and_writes_nothing() {
    let (app, db, paypal) = app();
    send(
        &app,
        request("POST", "/api/payments/paypal", None, Some(paypal_donation(25.0))),
    )
    .await;
    paypal.script.lock().unwrap().order_status = "CREATED".to_string();

    let (status, body) = send(
        &app,
        request("POST", "/api/payments/verify", None, Some(json!({ "orderId": "ORDER-1" }))),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("CREATED"));
    assert_eq!(paypal.count("capture_order"), 0);

    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations[0]["status"], "pending");
    assert_eq!(db.count(DONORS).await, 0);
    assert_eq!(db.count(NOTIFICATIONS).await, 0);
}

#[tokio::test]
async fn incomplete_capture_is_a_provider_error() {
    let (app, db, paypal) = app();
    send(
        &app,
        request("POST", "/api/payments/paypal", None, Some(paypal_donation(25.0))),
    )
    .await;
    paypal.script.lock().unwrap().capture_status = "PENDING".to_string();

    let (status, body) = send(
        &app,
        request("POST", "/api/payments/verify", None, Some(json!({ "orderId": "ORDER-1" }))),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("PENDING"));
    assert_eq!(db.count(DONORS).await, 0);
}

#[tokio::test]
async fn monthly_donation_creates_product_plan_and_subscription() {
    let (app, db, paypal) = app();
    let mut donation = paypal_donation(15.0);
    donation["donationType"] = json!("monthly");

    let (status, body) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paymentId"], "I-SUB1");
    assert_eq!(
        paypal.calls(),
        vec!["create_product", "create_plan", "create_subscription"]
    );

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/payments/verify",
            None,
            Some(json!({ "subscriptionId": "I-SUB1" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["frequency"], "monthly");
    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations[0]["status"], "completed");
}

#[tokio::test]
async fn failed_subscription_deactivates_its_plan() {
    let (app, db, paypal) = app();
    paypal.script.lock().unwrap().fail_subscription = true;
    let mut donation = paypal_donation(15.0);
    donation["donationType"] = json!("yearly");

    let (status, body) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("UNPROCESSABLE_ENTITY"));
    assert_eq!(paypal.count("deactivate_plan"), 1);
    assert_eq!(db.count(DONATIONS).await, 0);
}

async fn completed_paypal_donation(app: &axum::Router) {
    send(
        app,
        request("POST", "/api/payments/paypal", None, Some(paypal_donation(25.0))),
    )
    .await;
    let (status, _) = send(
        app,
        request("POST", "/api/payments/verify", None, Some(json!({ "orderId": "ORDER-1" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

fn refund_event() -> Value {
    json!({
        "id": "WH-REFUND",
        "event_type": "PAYMENT.CAPTURE.REFUNDED",
        "resource": {
            "id": "REFUND-1",
            "links": [{ "rel": "up", "href": "https://api.paypal.com/v2/payments/captures/CAPTURE-1" }]
        }
    })
}

#[tokio::test]
async fn refund_webhook_moves_completed_to_refunded() {
    let (app, db, paypal) = app_with_webhook_id();
    completed_paypal_donation(&app).await;

    let webhook = request("POST", "/api/payments/paypal/webhook", None, Some(refund_event()));
    let (status, body) = send(&app, with_paypal_headers(webhook)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], true);
    assert_eq!(paypal.count("verify_webhook_signature"), 1);

    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations[0]["status"], "refunded");
}

#[tokio::test]
async fn badly_signed_webhook_changes_nothing() {
    let (app, db, paypal) = app_with_webhook_id();
    completed_paypal_donation(&app).await;
    paypal.script.lock().unwrap().webhook_valid = false;

    let webhook = request("POST", "/api/payments/paypal/webhook", None, Some(refund_event()));
    let (status, _) = send(&app, with_paypal_headers(webhook)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Headers missing altogether.
    let (status, _) = send(
        &app,
        request("POST", "/api/payments/paypal/webhook", None, Some(refund_event())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations[0]["status"], "completed");
}

#[tokio::test]
async fn unsigned_capture_event_is_not_applied_without_webhook_id() {
    let (app, db, paypal) = app();
    send(
        &app,
        request("POST", "/api/payments/paypal", None, Some(paypal_donation(25.0))),
    )
    .await;

    let event = json!({
        "id": "WH-FORGED",
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "FAKE-CAPTURE",
            "supplementary_data": { "related_ids": { "order_id": "ORDER-1" } }
        }
    });
    let (status, body) = send(
        &app,
        request("POST", "/api/payments/paypal/webhook", None, Some(event)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], false);

    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations[0]["status"], "pending");
    assert_eq!(donations[0]["tx_hash"], Value::Null);
    assert_eq!(db.count(DONORS).await, 0);
    assert_eq!(db.count(NOTIFICATIONS).await, 0);
    assert_eq!(paypal.count("capture_order"), 0);
}

#[tokio::test]
async fn verify_rejects_ids_that_are_not_paypal_tokens() {
    let (app, _, paypal) = app();
    for id in ["../../v1/identity/oauth2/userinfo", "ORDER-1?fields=all", ""] {
        let (status, _) = send(
            &app,
            request("POST", "/api/payments/verify", None, Some(json!({ "orderId": id }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert!(paypal.calls().is_empty());
}

#[tokio::test]
async fn custom_id_survives_multibyte_and_quoted_names() {
    let (app, _, paypal) = app();
    let mut donation = paypal_donation(25.0);
    let name = "Zoë \"Żaneta\" Łukasiewicz-日本語 \\ ".repeat(6);
    donation["donorName"] = json!(name);
    donation["message"] = json!("ąęść ".repeat(40));

    let (status, _) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::OK);

    let custom_id = paypal.script.lock().unwrap().custom_id.clone().unwrap();
    assert!(custom_id.len() <= 127);
    let donor = DonorInfo::from_custom_id(Some(&custom_id));
    assert_eq!(donor.email.as_deref(), Some("ada@example.org"));
    let kept = donor.name.unwrap();
    assert!(!kept.is_empty());
    assert!(name.trim().starts_with(&kept));
}

#[tokio::test]
async fn oversized_donor_name_is_rejected() {
    let (app, _, paypal) = app();
    let mut donation = paypal_donation(25.0);
    donation["donorName"] = json!("n".repeat(60_000));

    let (status, _) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(paypal.calls().is_empty());
}

fn donation_request(value: Value) -> DonationRequest {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn process_donation_reports_failures_in_the_result() {
    let paypal = FakePayPal::new();
    let db = Arc::new(MemoryDatabase::new());
    let state = state_with(config(), DbClients::shared(db), paypal.clone());

    let result = process_donation(&state, donation_request(paypal_donation(0.5))).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("at least 1"));

    let mut card = paypal_donation(10.0);
    card["paymentMethod"] = json!("card");
    let result = process_donation(&state, donation_request(card)).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(CARD_UNAVAILABLE));
    assert!(paypal.calls().is_empty());

    let result = process_donation(&state, donation_request(paypal_donation(10.0))).await;
    assert!(result.success);
    assert_eq!(result.payment_id.as_deref(), Some("ORDER-1"));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn crypto_donation_prices_and_tracks_transaction() {
    let (app, db, paypal) = app();
    let donation = json!({
        "amount": 100.0,
        "currency": "USD",
        "paymentMethod": "crypto",
        "cryptoCurrency": "BTC",
        "network": "bitcoin",
    });

    let (status, body) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cryptoAmount"], 0.002);
    assert_eq!(body["walletAddress"], "bc1qtestwalletaddress");
    assert_eq!(body["qrCode"], "bitcoin:bc1qtestwalletaddress?amount=0.002");
    assert!(paypal.calls().is_empty());
    let payment_id = body["paymentId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/payments/crypto/confirm",
            None,
            Some(json!({ "paymentId": payment_id, "txHash": "0x1234" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let tx_hash = "ab".repeat(32);
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/payments/crypto/confirm",
            None,
            Some(json!({ "paymentId": payment_id, "txHash": tx_hash })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // No explorer for bitcoin: held for manual review.
    assert_eq!(body["status"], "pending");
    assert_eq!(body["txHash"], tx_hash);
    assert_eq!(db.count(NOTIFICATIONS).await, 1);

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/api/payments/crypto/status?id={}", payment_id),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["expired"], false);
}

#[tokio::test]
async fn crypto_pair_must_be_supported() {
    let (app, db, _) = app();
    let donation = json!({
        "amount": 100.0,
        "currency": "USD",
        "paymentMethod": "crypto",
        "cryptoCurrency": "BTC",
        "network": "solana",
    });
    let (status, _) = send(&app, request("POST", "/api/donations", None, Some(donation))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(db.count(DONATIONS).await, 0);
}

fn eth_donation() -> Value {
    json!({
        "amount": 100.0,
        "currency": "USD",
        "paymentMethod": "crypto",
        "cryptoCurrency": "ETH",
        "network": "ethereum",
        "donorEmail": "vitalik@example.org",
    })
}

async fn create_eth_payment(app: &axum::Router) -> String {
    let (status, body) = send(app, request("POST", "/api/donations", None, Some(eth_donation()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cryptoAmount"], 0.05);
    body["paymentId"].as_str().unwrap().to_string()
}

fn confirm(payment_id: &str, tx_hash: &str) -> axum::http::Request<axum::body::Body> {
    request(
        "POST",
        "/api/payments/crypto/confirm",
        None,
        Some(json!({ "paymentId": payment_id, "txHash": tx_hash })),
    )
}

#[tokio::test]
async fn transfer_to_another_wallet_does_not_complete_donation() {
    let chain = FakeChain::answering(TxStatus::Mismatch);
    let (app, db) = app_with_chain(chain.clone());
    let payment_id = create_eth_payment(&app).await;

    let (status, body) = send(&app, confirm(&payment_id, &format!("0x{}", "c".repeat(64)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains(ETH_WALLET));

    let seen = chain.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].asset, Asset::Eth);
    assert_eq!(seen[0].to, ETH_WALLET);
    assert_eq!(seen[0].amount, 0.05);

    let donations = db.select(Query::table(DONATIONS)).await.unwrap();
    assert_eq!(donations[0]["status"], "pending");
    assert_eq!(donations[0]["tx_hash"], Value::Null);
    assert_eq!(db.count(DONORS).await, 0);
}

#[tokio::test]
async fn matching_transfer_completes_donation_and_hash_is_single_use() {
    let chain = FakeChain::answering(TxStatus::Confirmed);
    let (app, db) = app_with_chain(chain);
    let first = create_eth_payment(&app).await;
    let second = create_eth_payment(&app).await;
    let tx_hash = format!("0x{}", "d".repeat(64));

    let (status, body) = send(&app, confirm(&first, &tx_hash)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(db.count(DONORS).await, 1);

    let (status, body) = send(&app, confirm(&second, &tx_hash)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already submitted"));

    let rows = db
        .select(Query::table(DONATIONS).eq("id", second.as_str()))
        .await
        .unwrap();
    assert_eq!(rows[0]["status"], "pending");
}

#[tokio::test]
async fn expired_reservation_reads_as_failed() {
    let (app, db, _) = app();
    let (_, body) = send(
        &app,
        request(
            "POST",
            "/api/donations",
            None,
            Some(json!({
                "amount": 100.0,
                "currency": "USD",
                "paymentMethod": "crypto",
                "cryptoCurrency": "BTC",
                "network": "bitcoin",
            })),
        ),
    )
    .await;
    let payment_id = body["paymentId"].as_str().unwrap().to_string();

    let rows = db
        .select(Query::table(DONATIONS).eq("id", payment_id.as_str()))
        .await
        .unwrap();
    let mut metadata = rows[0]["metadata"].clone();
    metadata["expiresAt"] = json!(chrono::Utc::now() - chrono::Duration::minutes(31));
    db.update(
        DONATIONS,
        &[Filter::eq("id", payment_id.as_str())],
        to_row(&json!({ "metadata": metadata })).unwrap(),
    )
    .await
    .unwrap();

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/api/payments/crypto/status?id={}", payment_id),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["expired"], true);

    // A late transaction hash is refused once the reservation has lapsed.
    let (status, _) = send(&app, confirm(&payment_id, &"ab".repeat(32))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
