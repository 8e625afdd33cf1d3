// src/paypal_handler.rs
// PayPal checkout, verification/capture and webhook routes.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::donation::{
    self, DonationRecord, DonationRequest, DonationStatus, DonationType, DonorInfo,
    PaymentMethod,
};
use crate::error::AppError;
use crate::payment_service::PaymentResult;
use crate::paypal_client::{
    approval_link, is_valid_resource_id, Interval, Money, NewOrder, NewPlan, NewSubscription,
    Order, PayPalError, Subscription, WebhookHeaders,
};
use crate::store::Database;
use crate::AppState;

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPalEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource: Value,
    #[serde(default)]
    pub summary: Option<String>,
}

impl PayPalEvent {
    /// Order id a capture event belongs to.
    fn related_order_id(&self) -> Option<&str> {
        self.resource["supplementary_data"]["related_ids"]["order_id"].as_str()
    }

    /// Capture id a refund event points back to (the `up` link).
    fn refunded_capture_id(&self) -> Option<String> {
        if let Some(id) = self.resource["supplementary_data"]["related_ids"]["capture_id"].as_str() {
            return Some(id.to_string());
        }
        self.resource["links"]
            .as_array()?
            .iter()
            .find(|link| link["rel"] == "up")
            .and_then(|link| link["href"].as_str())
            .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// PayPal's return URL carries the order id as `token`.
    #[serde(default, alias = "paymentId", alias = "token")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub success: bool,
    pub donation_id: String,
    pub status: DonationStatus,
    pub amount: f64,
    pub currency: String,
    pub frequency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl From<&DonationRecord> for VerifyResult {
    fn from(record: &DonationRecord) -> Self {
        Self {
            success: record.status == DonationStatus::Completed,
            donation_id: record.id.clone(),
            status: record.status,
            amount: record.amount,
            currency: record.currency.clone(),
            frequency: record.frequency.clone(),
            transaction_id: record.tx_hash.clone(),
        }
    }
}

pub fn checkout_router() -> Router<AppState> {
    Router::new().route("/api/payments/paypal", post(create_paypal_payment))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/verify", post(verify_payment))
        .route("/api/payments/paypal/webhook", post(paypal_webhook_handler))
}

fn database(state: &AppState) -> Result<Arc<dyn Database>, AppError> {
    state
        .db
        .preferred()
        .ok_or_else(|| AppError::Config("Database is not configured".to_string()))
}

fn interval(donation_type: DonationType) -> Option<Interval> {
    match donation_type {
        DonationType::OneTime => None,
        DonationType::Monthly => Some(Interval::Month),
        DonationType::Yearly => Some(Interval::Year),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKOUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Creates the PayPal order or subscription for a validated request and
/// records it as a pending donation.
pub async fn create_payment(
    state: &AppState,
    request: &DonationRequest,
) -> Result<PaymentResult, AppError> {
    let custom_id = request.donor().to_custom_id();
    let return_url = format!("{}/donate/success?provider=paypal", state.config.site_url);
    let cancel_url = format!("{}/donate?cancelled=true", state.config.site_url);

    let (reference, links) = match interval(request.donation_type) {
        None => {
            let order = state
                .paypal
                .create_order(NewOrder {
                    amount: Money::new(&request.currency, request.amount),
                    description: format!("Donation to {}", state.config.organization_name),
                    custom_id,
                    brand_name: state.config.organization_name.clone(),
                    return_url,
                    cancel_url,
                })
                .await?;
            tracing::info!("[PAYPAL] Created order {}", order.id);
            (order.id, order.links)
        }
        Some(interval) => {
            let subscription =
                create_subscription(state, request, interval, custom_id, return_url, cancel_url)
                    .await?;
            tracing::info!("[PAYPAL] Created subscription {}", subscription.id);
            (subscription.id, subscription.links)
        }
    };

    let approval_url = approval_link(&links).ok_or_else(|| {
        PayPalError::UnexpectedState(format!("PayPal returned no approval link for {}", reference))
    })?;

    let mut pending = DonationRecord::pending(request, PaymentMethod::Paypal);
    pending.tx_reference = Some(reference.clone());
    pending.metadata = json!({
        "provider": "paypal",
        "kind": if request.donation_type.is_recurring() { "subscription" } else { "order" },
    });
    let donation_id = match state.db.preferred() {
        Some(db) => Some(donation::insert_donation(db.as_ref(), &pending).await?.id),
        None => {
            tracing::warn!("[PAYPAL] No database; {} is not recorded as pending", reference);
            None
        }
    };

    Ok(PaymentResult {
        success: true,
        payment_id: Some(reference),
        approval_url: Some(approval_url),
        donation_id,
        ..Default::default()
    })
}

/// Product -> Plan -> Subscription. If the last step fails the plan is
/// deactivated; PayPal products cannot be deleted and are left in place.
async fn create_subscription(
    state: &AppState,
    request: &DonationRequest,
    interval: Interval,
    custom_id: String,
    return_url: String,
    cancel_url: String,
) -> Result<Subscription, PayPalError> {
    let org = &state.config.organization_name;
    let frequency = request.donation_type.as_str();
    let price = Money::new(&request.currency, request.amount);

    let product = state
        .paypal
        .create_product(
            &format!("{} {} donation", org, frequency),
            &format!("Recurring {} donation to {}", frequency, org),
        )
        .await?;

    let plan = state
        .paypal
        .create_plan(NewPlan {
            product_id: product.id.clone(),
            name: format!("{} {} {} donation", price.value, price.currency_code, frequency),
            price,
            interval,
        })
        .await?;

    let donor = request.donor();
    let created = state
        .paypal
        .create_subscription(NewSubscription {
            plan_id: plan.id.clone(),
            subscriber_name: donor.name,
            subscriber_email: donor.email,
            custom_id,
            brand_name: org.clone(),
            return_url,
            cancel_url,
        })
        .await;

    match created {
        Ok(subscription) => Ok(subscription),
        Err(e) => {
            tracing::error!("[PAYPAL] Subscription failed on plan {}: {}", plan.id, e);
            if let Err(undo) = state.paypal.deactivate_plan(&plan.id).await {
                tracing::error!("[PAYPAL] Could not deactivate plan {}: {}", plan.id, undo);
            }
            tracing::warn!("[PAYPAL] Product {} left without an active plan", product.id);
            Err(e)
        }
    }
}

/// Checkout response; also names the PayPal object the front-end resumes with.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    #[serde(flatten)]
    pub result: PaymentResult,
    #[serde(rename = "orderID", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(rename = "subscriptionID", skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

async fn create_paypal_payment(
    State(state): State<AppState>,
    Json(mut request): Json<DonationRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    match request.payment_method {
        None => request.payment_method = Some(PaymentMethod::Paypal),
        Some(PaymentMethod::Paypal) => {}
        Some(other) => {
            return Err(AppError::Validation(format!(
                "This endpoint only accepts PayPal, not {}",
                other.as_str()
            )))
        }
    }
    request.validate()?;
    let result = create_payment(&state, &request).await?;
    let (order_id, subscription_id) = if request.donation_type.is_recurring() {
        (None, result.payment_id.clone())
    } else {
        (result.payment_id.clone(), None)
    };
    Ok(Json(CheckoutResponse {
        result,
        order_id,
        subscription_id,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// VERIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResult>, AppError> {
    for id in request.order_id.iter().chain(request.subscription_id.iter()) {
        if !is_valid_resource_id(id) {
            return Err(AppError::Validation(format!("Invalid PayPal id: {:?}", id)));
        }
    }
    let result = match (request.order_id, request.subscription_id) {
        (Some(order_id), None) => verify_order(&state, &order_id).await?,
        (None, Some(subscription_id)) => verify_subscription(&state, &subscription_id).await?,
        _ => {
            return Err(AppError::Validation(
                "Provide either orderId or subscriptionId".to_string(),
            ))
        }
    };
    Ok(Json(result))
}

/// Captures an approved order and stores the completed donation.
pub async fn verify_order(state: &AppState, order_id: &str) -> Result<VerifyResult, AppError> {
    let db = database(state)?;
    let existing = donation::find_by_reference(db.as_ref(), order_id).await?;
    if let Some(record) = existing.as_ref().filter(|r| r.status == DonationStatus::Completed) {
        tracing::info!("[PAYPAL] Order {} already completed", order_id);
        return Ok(VerifyResult::from(record));
    }

    let order = state.paypal.get_order(order_id).await?;
    if order.status != "APPROVED" {
        return Err(PayPalError::UnexpectedState(format!(
            "Order {} is not approved (status: {})",
            order_id, order.status
        ))
        .into());
    }

    let captured = state.paypal.capture_order(order_id).await?;
    if captured.status != "COMPLETED" {
        return Err(PayPalError::UnexpectedState(format!(
            "Capture of order {} did not complete (status: {})",
            order_id, captured.status
        ))
        .into());
    }

    let capture = captured.first_capture();
    let donor = DonorInfo::from_custom_id(
        order
            .custom_id()
            .or_else(|| captured.custom_id())
            .or_else(|| capture.and_then(|c| c.custom_id.as_deref())),
    );
    let amount = capture
        .and_then(|c| c.amount.clone())
        .or_else(|| order_amount(&order))
        .ok_or_else(|| PayPalError::UnexpectedState(format!("Order {} has no amount", order_id)))?;

    let payment = CompletedPayment {
        reference: order_id.to_string(),
        tx_hash: capture.map(|c| c.id.clone()),
        amount,
        frequency: DonationType::OneTime,
        donor: with_payer_fallback(donor, &captured),
    };
    let record = store_completed(db.as_ref(), existing, payment).await?;
    tracing::info!("[PAYPAL] Order {} captured as donation {}", order_id, record.id);
    Ok(VerifyResult::from(&record))
}

/// Confirms an active subscription and stores its first payment.
pub async fn verify_subscription(
    state: &AppState,
    subscription_id: &str,
) -> Result<VerifyResult, AppError> {
    let db = database(state)?;
    let existing = donation::find_by_reference(db.as_ref(), subscription_id).await?;
    if let Some(record) = existing.as_ref().filter(|r| r.status == DonationStatus::Completed) {
        return Ok(VerifyResult::from(record));
    }

    let subscription = state.paypal.get_subscription(subscription_id).await?;
    if subscription.status != "ACTIVE" {
        return Err(PayPalError::UnexpectedState(format!(
            "Subscription {} is not active (status: {})",
            subscription_id, subscription.status
        ))
        .into());
    }

    let amount = subscription
        .billing_info
        .as_ref()
        .and_then(|b| b.last_payment.as_ref())
        .and_then(|p| p.amount.clone())
        .or_else(|| {
            existing
                .as_ref()
                .map(|r| Money::new(&r.currency, r.amount))
        })
        .ok_or_else(|| {
            PayPalError::UnexpectedState(format!("Subscription {} has no amount", subscription_id))
        })?;

    let frequency = existing
        .as_ref()
        .and_then(|r| serde_json::from_value(json!(r.frequency)).ok())
        .unwrap_or(DonationType::Monthly);

    let mut donor = DonorInfo::from_custom_id(subscription.custom_id.as_deref());
    if let Some(subscriber) = &subscription.subscriber {
        donor.email = donor.email.or_else(|| subscriber.email_address.clone());
        donor.name = donor
            .name
            .or_else(|| subscriber.name.as_ref().and_then(|n| n.full()));
    }

    let payment = CompletedPayment {
        reference: subscription_id.to_string(),
        tx_hash: Some(subscription_id.to_string()),
        amount,
        frequency,
        donor,
    };
    let record = store_completed(db.as_ref(), existing, payment).await?;
    tracing::info!("[PAYPAL] Subscription {} active as donation {}", subscription_id, record.id);
    Ok(VerifyResult::from(&record))
}

fn order_amount(order: &Order) -> Option<Money> {
    order.purchase_units.iter().find_map(|u| u.amount.clone())
}

fn with_payer_fallback(mut donor: DonorInfo, order: &Order) -> DonorInfo {
    if let Some(payer) = &order.payer {
        donor.email = donor.email.or_else(|| payer.email_address.clone());
        donor.name = donor.name.or_else(|| payer.name.as_ref().and_then(|n| n.full()));
    }
    donor
}

struct CompletedPayment {
    reference: String,
    tx_hash: Option<String>,
    amount: Money,
    frequency: DonationType,
    donor: DonorInfo,
}

/// Completes the pending record when there is one, otherwise inserts a
/// completed record, then credits the donor and notifies admins.
async fn store_completed(
    db: &dyn Database,
    pending: Option<DonationRecord>,
    payment: CompletedPayment,
) -> Result<DonationRecord, AppError> {
    let record = match pending {
        Some(pending) => {
            let mut patch = Map::new();
            patch.insert("status".into(), json!(DonationStatus::Completed));
            patch.insert("tx_hash".into(), json!(payment.tx_hash));
            patch.insert("amount".into(), json!(payment.amount.amount()));
            patch.insert("currency".into(), json!(payment.amount.currency_code));
            if pending.donor_email.is_none() {
                patch.insert("donor_email".into(), json!(payment.donor.email));
            }
            if pending.donor_name.is_none() {
                patch.insert("donor_name".into(), json!(payment.donor.name));
            }
            donation::update_donation(db, &pending.id, patch)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Donation {} vanished", pending.id)))?
        }
        None => {
            let now = Utc::now();
            let record = DonationRecord {
                id: uuid::Uuid::new_v4().to_string(),
                category: payment.donor.category.unwrap_or_else(|| "general".to_string()),
                amount: payment.amount.amount(),
                currency: payment.amount.currency_code,
                frequency: payment.frequency.as_str().to_string(),
                payment_method: PaymentMethod::Paypal.as_str().to_string(),
                status: DonationStatus::Completed,
                tx_hash: payment.tx_hash,
                tx_reference: Some(payment.reference),
                donor_name: payment.donor.name,
                donor_email: payment.donor.email,
                message: payment.donor.message,
                source: payment.donor.source,
                beneficiary_id: None,
                metadata: json!({ "provider": "paypal" }),
                created_at: now,
                updated_at: now,
            };
            donation::insert_donation(db, &record).await?
        }
    };

    donation::announce_completion(db, &record).await;
    Ok(record)
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBHOOK HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn paypal_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;

    let Some(webhook_id) = state.config.paypal.webhook_id.as_deref() else {
        tracing::warn!(
            "[PAYPAL] PAYPAL_WEBHOOK_ID not set; {} logged but not applied",
            raw["event_type"].as_str().unwrap_or("event")
        );
        return Ok((
            StatusCode::OK,
            Json(json!({ "received": true, "processed": false })),
        ));
    };

    let transmission = WebhookHeaders::from_map(&headers).ok_or_else(|| {
        AppError::Unauthorized("Missing PayPal transmission headers".to_string())
    })?;
    let verified = state
        .paypal
        .verify_webhook_signature(webhook_id, &transmission, &raw)
        .await?;
    if !verified {
        tracing::warn!("[PAYPAL] Rejected webhook with bad signature");
        return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
    }

    let event: PayPalEvent = serde_json::from_value(raw)
        .map_err(|e| AppError::Validation(format!("Invalid webhook event: {}", e)))?;
    tracing::info!("[PAYPAL] Received: {} ({})", event.event_type, event.id);

    match event.event_type.as_str() {
        "PAYMENT.CAPTURE.COMPLETED" => capture_completed(&state, &event).await?,
        "PAYMENT.CAPTURE.REFUNDED" => capture_refunded(&state, &event).await?,
        "BILLING.SUBSCRIPTION.CREATED" | "BILLING.SUBSCRIPTION.ACTIVATED" => {
            tracing::info!("[PAYPAL] Subscription {}: {}", event.resource["id"], event.event_type);
        }
        "BILLING.SUBSCRIPTION.CANCELLED" => {
            tracing::info!("[PAYPAL] Subscription cancelled: {}", event.resource["id"]);
        }
        _ => {
            tracing::debug!("[PAYPAL] Unhandled: {}", event.event_type);
        }
    }

    Ok((StatusCode::OK, Json(json!({ "received": true, "processed": true }))))
}

async fn capture_completed(state: &AppState, event: &PayPalEvent) -> Result<(), AppError> {
    let (Some(order_id), Some(capture_id)) =
        (event.related_order_id(), event.resource["id"].as_str())
    else {
        tracing::warn!("[PAYPAL] Capture event {} has no order reference", event.id);
        return Ok(());
    };
    let db = database(state)?;
    let Some(record) = donation::find_by_reference(db.as_ref(), order_id).await? else {
        tracing::warn!("[PAYPAL] No donation for order {}", order_id);
        return Ok(());
    };
    if record.status != DonationStatus::Pending {
        return Ok(());
    }

    let mut patch = Map::new();
    patch.insert("status".into(), json!(DonationStatus::Completed));
    patch.insert("tx_hash".into(), json!(capture_id));
    if let Some(updated) = donation::update_donation(db.as_ref(), &record.id, patch).await? {
        tracing::info!("[PAYPAL] Donation {} completed by webhook", updated.id);
        donation::announce_completion(db.as_ref(), &updated).await;
    }
    Ok(())
}

async fn capture_refunded(state: &AppState, event: &PayPalEvent) -> Result<(), AppError> {
    let Some(capture_id) = event.refunded_capture_id() else {
        tracing::warn!("[PAYPAL] Refund event {} has no capture reference", event.id);
        return Ok(());
    };
    let db = database(state)?;
    let Some(record) = donation::find_by_tx_hash(db.as_ref(), &capture_id).await? else {
        tracing::warn!("[PAYPAL] No donation for capture {}", capture_id);
        return Ok(());
    };
    if record.status != DonationStatus::Completed {
        return Ok(());
    }

    let mut patch = Map::new();
    patch.insert("status".into(), json!(DonationStatus::Refunded));
    donation::update_donation(db.as_ref(), &record.id, patch).await?;
    tracing::info!("[PAYPAL] Donation {} refunded", record.id);
    Ok(())
}
