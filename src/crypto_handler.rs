// src/crypto_handler.rs
// Crypto donations: wallet allocation, transaction confirmation, status polling.

use axum::{
    extract::{Query as QueryParams, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;

use crate::crypto_client::{
    pick_wallet, round_amount, Asset, ExpectedTransfer, Network, TxStatus,
};
use crate::donation::{self, DonationRecord, DonationRequest, DonationStatus, PaymentMethod};
use crate::error::AppError;
use crate::notifications::{self, AdminNotification, NotificationKind};
use crate::payment_service::{CryptoDetails, PaymentResult};
use crate::store::Database;
use crate::AppState;

/// How long an allocated address is held for one payment.
pub const PAYMENT_WINDOW_MINUTES: i64 = 30;

/// Stored in the donation's `metadata` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoMetadata {
    pub crypto_currency: String,
    pub network: String,
    pub crypto_amount: f64,
    pub wallet_address: String,
    pub exchange_rate: f64,
    pub expires_at: DateTime<Utc>,
}

impl CryptoMetadata {
    fn of(record: &DonationRecord) -> Result<Self, AppError> {
        serde_json::from_value(record.metadata.clone()).map_err(|_| {
            AppError::Database(format!("Donation {} has no crypto payment details", record.id))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub payment_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoStatus {
    pub payment_id: String,
    pub status: DonationStatus,
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub wallet_address: String,
    pub crypto_amount: f64,
    pub crypto_currency: String,
    pub network: String,
    pub expires_at: DateTime<Utc>,
}

impl CryptoStatus {
    fn new(record: &DonationRecord, meta: &CryptoMetadata, now: DateTime<Utc>) -> Self {
        Self {
            payment_id: record.id.clone(),
            status: record.status,
            expired: record.tx_hash.is_none() && meta.expires_at <= now,
            tx_hash: record.tx_hash.clone(),
            wallet_address: meta.wallet_address.clone(),
            crypto_amount: meta.crypto_amount,
            crypto_currency: meta.crypto_currency.clone(),
            network: meta.network.clone(),
            expires_at: meta.expires_at,
        }
    }
}

pub fn checkout_router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/crypto", post(create_crypto_payment))
        .route("/api/payments/crypto/confirm", post(confirm_payment))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/payments/crypto/status", get(payment_status))
}

fn database(state: &AppState) -> Result<Arc<dyn Database>, AppError> {
    state
        .db
        .preferred()
        .ok_or_else(|| AppError::Config("Database is not configured".to_string()))
}

/// Wallet deep link encoded into the QR code.
pub fn payment_uri(asset: Asset, network: Network, address: &str, amount: f64) -> String {
    let mut uri = format!("{}:{}?amount={}", network.uri_scheme(), address, amount);
    if asset.is_stablecoin() {
        uri.push_str(&format!("&token={}", asset.symbol()));
    }
    uri
}

fn instructions(asset: Asset, network: Network, address: &str, amount: f64) -> String {
    format!(
        "Send exactly {} {} on the {} network to {}. The address is reserved for {} minutes; \
         submit the transaction hash once the transfer is sent.",
        amount,
        asset.symbol(),
        network.as_str(),
        address,
        PAYMENT_WINDOW_MINUTES
    )
}

/// Allocates a wallet and prices a validated crypto request.
pub async fn create_payment(
    state: &AppState,
    request: &DonationRequest,
) -> Result<PaymentResult, AppError> {
    let (asset, network) = request.crypto_pair()?;
    let db = database(state)?;

    let wallet = pick_wallet(&state.config.crypto.wallets, asset, network).ok_or_else(|| {
        AppError::Validation(format!(
            "{} donations on {} are not available right now",
            asset.symbol(),
            network.as_str()
        ))
    })?;

    let rate = state.rates.price(asset, &request.currency).await?;
    let crypto_amount = round_amount(asset, request.amount / rate);
    let expires_at = Utc::now() + Duration::minutes(PAYMENT_WINDOW_MINUTES);

    let meta = CryptoMetadata {
        crypto_currency: asset.symbol().to_string(),
        network: network.as_str().to_string(),
        crypto_amount,
        wallet_address: wallet.clone(),
        exchange_rate: rate,
        expires_at,
    };
    let mut pending = DonationRecord::pending(request, PaymentMethod::Crypto);
    pending.metadata = serde_json::to_value(&meta)?;
    let stored = donation::insert_donation(db.as_ref(), &pending).await?;

    tracing::info!(
        "[CRYPTO] Payment {}: {} {} on {}",
        stored.id,
        crypto_amount,
        asset,
        network.as_str()
    );

    Ok(PaymentResult {
        success: true,
        payment_id: Some(stored.id.clone()),
        donation_id: Some(stored.id),
        crypto: Some(CryptoDetails {
            qr_code: payment_uri(asset, network, &wallet, crypto_amount),
            payment_instructions: instructions(asset, network, &wallet, crypto_amount),
            wallet_address: wallet,
            crypto_amount,
            crypto_currency: meta.crypto_currency,
            network: meta.network,
            expires_at,
        }),
        ..Default::default()
    })
}

async fn create_crypto_payment(
    State(state): State<AppState>,
    Json(mut request): Json<DonationRequest>,
) -> Result<Json<PaymentResult>, AppError> {
    request.payment_method = Some(PaymentMethod::Crypto);
    request.validate()?;
    Ok(Json(create_payment(&state, &request).await?))
}

async fn load(db: &dyn Database, id: &str) -> Result<(DonationRecord, CryptoMetadata), AppError> {
    let record = donation::find_by_id(db, id)
        .await?
        .filter(|r| r.payment_method == PaymentMethod::Crypto.as_str())
        .ok_or_else(|| AppError::NotFound(format!("Crypto payment {} not found", id)))?;
    let meta = CryptoMetadata::of(&record)?;
    Ok((record, meta))
}

async fn set_status(
    db: &dyn Database,
    id: &str,
    status: DonationStatus,
    tx_hash: Option<&str>,
) -> Result<DonationRecord, AppError> {
    let mut patch = Map::new();
    patch.insert("status".into(), json!(status));
    if let Some(hash) = tx_hash {
        patch.insert("tx_hash".into(), json!(hash));
    }
    donation::update_donation(db, id, patch)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Crypto payment {} not found", id)))
}

/// Records the donor's transaction hash and checks it on chain where possible.
pub async fn confirm(state: &AppState, request: ConfirmRequest) -> Result<CryptoStatus, AppError> {
    let db = database(state)?;
    let (record, meta) = load(db.as_ref(), &request.payment_id).await?;
    let now = Utc::now();

    match record.status {
        DonationStatus::Pending => {}
        DonationStatus::Completed => return Ok(CryptoStatus::new(&record, &meta, now)),
        DonationStatus::Failed | DonationStatus::Refunded => {
            return Err(AppError::Validation(format!(
                "Crypto payment {} is no longer pending",
                record.id
            )))
        }
    }

    let network: Network = meta.network.parse()?;
    let tx_hash = request.tx_hash.trim();
    if !network.is_valid_tx_hash(tx_hash) {
        return Err(AppError::Validation(format!(
            "Invalid transaction hash for {}",
            network.as_str()
        )));
    }
    if let Some(other) = donation::find_by_tx_hash(db.as_ref(), tx_hash).await? {
        if other.id != record.id {
            return Err(AppError::Validation(
                "Transaction hash was already submitted".to_string(),
            ));
        }
    }

    let expected = ExpectedTransfer {
        asset: meta.crypto_currency.parse()?,
        to: meta.wallet_address.clone(),
        amount: meta.crypto_amount,
    };
    let updated = match state.chain.check(network, tx_hash, &expected).await? {
        TxStatus::Mismatch => {
            return Err(AppError::Validation(format!(
                "Transaction {} does not send {} {} to {}",
                tx_hash, meta.crypto_amount, meta.crypto_currency, meta.wallet_address
            )))
        }
        TxStatus::Confirmed => {
            let updated =
                set_status(db.as_ref(), &record.id, DonationStatus::Completed, Some(tx_hash)).await?;
            tracing::info!("[CRYPTO] Payment {} confirmed on chain", updated.id);
            donation::announce_completion(db.as_ref(), &updated).await;
            updated
        }
        TxStatus::Failed => {
            tracing::warn!("[CRYPTO] Transaction {} failed on chain", tx_hash);
            set_status(db.as_ref(), &record.id, DonationStatus::Failed, Some(tx_hash)).await?
        }
        TxStatus::Pending => {
            set_status(db.as_ref(), &record.id, DonationStatus::Pending, Some(tx_hash)).await?
        }
        TxStatus::Unverifiable => {
            let updated =
                set_status(db.as_ref(), &record.id, DonationStatus::Pending, Some(tx_hash)).await?;
            notifications::notify(
                db.as_ref(),
                AdminNotification::new(
                    NotificationKind::Warning,
                    "donation",
                    "Crypto payment awaiting review",
                    format!(
                        "{} {} on {} submitted with transaction {}",
                        meta.crypto_amount, meta.crypto_currency, meta.network, tx_hash
                    ),
                )
                .with_metadata(json!({ "donationId": updated.id, "txHash": tx_hash })),
            )
            .await;
            updated
        }
    };

    Ok(CryptoStatus::new(&updated, &meta, now))
}

async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<CryptoStatus>, AppError> {
    Ok(Json(confirm(&state, request).await?))
}

/// Current status; an expired reservation with no transaction becomes `failed`.
pub async fn status(state: &AppState, id: &str) -> Result<CryptoStatus, AppError> {
    let db = database(state)?;
    let (mut record, meta) = load(db.as_ref(), id).await?;
    let now = Utc::now();

    let report = CryptoStatus::new(&record, &meta, now);
    if record.status == DonationStatus::Pending && report.expired {
        record = set_status(db.as_ref(), &record.id, DonationStatus::Failed, None).await?;
        tracing::info!("[CRYPTO] Payment {} expired", record.id);
    }
    Ok(CryptoStatus::new(&record, &meta, now))
}

async fn payment_status(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<StatusQuery>,
) -> Result<Json<CryptoStatus>, AppError> {
    Ok(Json(status(&state, &query.id).await?))
}
