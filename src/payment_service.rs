// src/payment_service.rs
// Single entry point for donations: validate, record the attempt, dispatch.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crypto_handler;
use crate::donation::{DonationRequest, PaymentMethod};
use crate::error::AppError;
use crate::paypal_handler;
use crate::AppState;

pub const CARD_UNAVAILABLE: &str = "Card payments are not yet available";

/// Wallet details returned for crypto donations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoDetails {
    pub wallet_address: String,
    pub crypto_amount: f64,
    pub crypto_currency: String,
    pub network: String,
    pub qr_code: String,
    pub expires_at: DateTime<Utc>,
    pub payment_instructions: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub crypto: Option<CryptoDetails>,
}

impl PaymentResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Never fails: errors are folded into `PaymentResult::error`.
pub async fn process_donation(state: &AppState, request: DonationRequest) -> PaymentResult {
    match try_process_donation(state, request).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("[DONATION] Attempt failed: {}", e);
            PaymentResult::failed(e.to_string())
        }
    }
}

pub async fn try_process_donation(
    state: &AppState,
    request: DonationRequest,
) -> Result<PaymentResult, AppError> {
    request.validate()?;
    let method = request
        .payment_method
        .ok_or_else(|| AppError::Validation("Payment method is required".to_string()))?;

    tracing::info!(
        target: "analytics",
        event = "donation_attempt",
        amount = request.amount,
        currency = %request.currency,
        method = method.as_str(),
        donation_type = request.donation_type.as_str(),
        "donation_attempt"
    );

    match method {
        PaymentMethod::Paypal => paypal_handler::create_payment(state, &request).await,
        PaymentMethod::Crypto => crypto_handler::create_payment(state, &request).await,
        PaymentMethod::Card => Err(AppError::Validation(CARD_UNAVAILABLE.to_string())),
    }
}

pub fn router() -> axum::Router<AppState> {
    Router::new().route("/api/donations", post(create_donation))
}

async fn create_donation(
    State(state): State<AppState>,
    Json(request): Json<DonationRequest>,
) -> Result<Json<PaymentResult>, AppError> {
    Ok(Json(try_process_donation(&state, request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_result_omits_empty_fields() {
        let value = serde_json::to_value(PaymentResult::failed(CARD_UNAVAILABLE)).unwrap();
        assert_eq!(value, json!({ "success": false, "error": CARD_UNAVAILABLE }));
    }

    #[test]
    fn crypto_details_flatten_into_result() {
        let result = PaymentResult {
            success: true,
            payment_id: Some("d-1".into()),
            crypto: Some(CryptoDetails {
                wallet_address: "bc1q".into(),
                crypto_amount: 0.001,
                crypto_currency: "BTC".into(),
                network: "bitcoin".into(),
                qr_code: "bitcoin:bc1q?amount=0.001".into(),
                expires_at: Utc::now(),
                payment_instructions: "Send".into(),
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["walletAddress"], "bc1q");
        assert_eq!(value["paymentId"], "d-1");
        assert!(value.get("crypto").is_none());
    }
}
