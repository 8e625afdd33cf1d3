// src/donation.rs
// Donation intake types, validation, and the donations/donors tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crypto_client::{Asset, Network};
use crate::error::AppError;
use crate::notifications::{self, AdminNotification, NotificationKind, Priority};
use crate::store::{from_row, from_rows, to_row, Database, Filter, Query, StoreError};

pub const MIN_DONATION: f64 = 1.0;

/// PayPal rejects `custom_id` values longer than this.
pub const CUSTOM_ID_MAX: usize = 127;

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DonationType {
    #[default]
    OneTime,
    Monthly,
    Yearly,
}

impl DonationType {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, DonationType::OneTime)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DonationType::OneTime => "one-time",
            DonationType::Monthly => "monthly",
            DonationType::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Paypal,
    Crypto,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Card => "card",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DonationRequest {
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub donation_type: DonationType,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub donor_email: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub beneficiary_id: Option<String>,
    #[serde(default)]
    pub crypto_currency: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl DonationRequest {
    /// Checks everything that can be checked without a network call.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.amount.is_finite() || self.amount < MIN_DONATION {
            return Err(AppError::Validation(format!(
                "Donation amount must be at least {}",
                MIN_DONATION
            )));
        }
        let currency = self.currency.trim();
        if currency.is_empty() {
            return Err(AppError::Validation("Currency is required".to_string()));
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::Validation(format!("Unsupported currency: {}", currency)));
        }
        let method = self
            .payment_method
            .ok_or_else(|| AppError::Validation("Payment method is required".to_string()))?;

        if non_empty(&self.donor_name).map_or(0, |n| n.chars().count()) > MAX_NAME_CHARS {
            return Err(AppError::Validation(format!(
                "Donor name must be at most {} characters",
                MAX_NAME_CHARS
            )));
        }
        if non_empty(&self.message).map_or(0, |m| m.chars().count()) > MAX_MESSAGE_CHARS {
            return Err(AppError::Validation(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        if let Some(email) = non_empty(&self.donor_email) {
            if !is_valid_email(email) {
                return Err(AppError::Validation("Donor email is invalid".to_string()));
            }
        }

        if method == PaymentMethod::Crypto {
            self.crypto_pair()?;
            if self.donation_type.is_recurring() {
                return Err(AppError::Validation(
                    "Recurring donations are only available with PayPal".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Asset/network of a crypto donation.
    pub fn crypto_pair(&self) -> Result<(Asset, Network), AppError> {
        let asset = non_empty(&self.crypto_currency).ok_or_else(|| {
            AppError::Validation("Cryptocurrency is required for crypto donations".to_string())
        })?;
        let network = non_empty(&self.network).ok_or_else(|| {
            AppError::Validation("Network is required for crypto donations".to_string())
        })?;
        let asset: Asset = asset
            .parse()
            .map_err(|_| AppError::Validation(format!("Unsupported cryptocurrency: {}", asset)))?;
        let network: Network = network
            .parse()
            .map_err(|_| AppError::Validation(format!("Unsupported network: {}", network)))?;
        if !asset.supports(network) {
            return Err(AppError::Validation(format!(
                "{} is not accepted on {}",
                asset.symbol(),
                network.as_str()
            )));
        }
        Ok((asset, network))
    }

    /// Donor identity as it should be stored; anonymous gifts keep no name.
    pub fn donor(&self) -> DonorInfo {
        DonorInfo {
            name: if self.anonymous {
                None
            } else {
                non_empty(&self.donor_name).map(str::to_string)
            },
            email: non_empty(&self.donor_email).map(str::to_string),
            message: non_empty(&self.message).map(str::to_string),
            source: non_empty(&self.source).map(str::to_string),
            category: non_empty(&self.category).map(str::to_string),
        }
    }
}

/// Donor context carried through PayPal's redirect inside `custom_id`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DonorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Length of `c` once written inside a JSON string by serde_json.
fn escaped_width(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{8}' | '\u{c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

impl DonorInfo {
    /// Compact JSON no longer than [`CUSTOM_ID_MAX`]. Optional context is
    /// dropped first (message, source, category), then the name is shortened;
    /// the email is never altered.
    pub fn to_custom_id(&self) -> String {
        let mut info = self.clone();
        let encode = |info: &DonorInfo| serde_json::to_string(info).unwrap_or_else(|_| "{}".into());

        let strip: [fn(&mut DonorInfo); 3] = [
            |i| i.message = None,
            |i| i.source = None,
            |i| i.category = None,
        ];
        let mut encoded = encode(&info);
        for step in strip {
            if encoded.len() <= CUSTOM_ID_MAX {
                return encoded;
            }
            step(&mut info);
            encoded = encode(&info);
        }

        if encoded.len() <= CUSTOM_ID_MAX {
            return encoded;
        }

        // Shorten the name once, to whatever room is left after everything else.
        let Some(name) = info.name.take() else {
            // An email this long cannot travel; keep nothing.
            return "{}".to_string();
        };
        info.name = Some(String::new());
        let overhead = encode(&info).len();
        if overhead > CUSTOM_ID_MAX {
            info.name = None;
            let without_name = encode(&info);
            return if without_name.len() <= CUSTOM_ID_MAX {
                without_name
            } else {
                "{}".to_string()
            };
        }

        let mut budget = CUSTOM_ID_MAX - overhead;
        let mut cut = String::new();
        for c in name.chars() {
            let width = escaped_width(c);
            if width > budget {
                break;
            }
            budget -= width;
            cut.push(c);
        }
        info.name = Some(cut).filter(|n| !n.is_empty());
        encode(&info)
    }

    pub fn from_custom_id(custom_id: Option<&str>) -> Self {
        custom_id
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: String,
    pub category: String,
    pub amount: f64,
    pub currency: String,
    pub frequency: String,
    pub payment_method: String,
    pub status: DonationStatus,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub tx_reference: Option<String>,
    #[serde(default)]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub donor_email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub beneficiary_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DonationRecord {
    pub fn pending(request: &DonationRequest, method: PaymentMethod) -> Self {
        let donor = request.donor();
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category: donor.category.clone().unwrap_or_else(|| "general".to_string()),
            amount: request.amount,
            currency: request.currency.trim().to_uppercase(),
            frequency: request.donation_type.as_str().to_string(),
            payment_method: method.as_str().to_string(),
            status: DonationStatus::Pending,
            tx_hash: None,
            tx_reference: None,
            donor_name: donor.name,
            donor_email: donor.email,
            message: donor.message,
            source: donor.source,
            beneficiary_id: non_empty(&request.beneficiary_id).map(str::to_string),
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

pub const DONATIONS: &str = "donations";
pub const DONORS: &str = "donors";

pub async fn insert_donation(
    db: &dyn Database,
    record: &DonationRecord,
) -> Result<DonationRecord, StoreError> {
    let row = db.insert(DONATIONS, to_row(record)?).await?;
    from_row(row)
}

pub async fn find_by_reference(
    db: &dyn Database,
    tx_reference: &str,
) -> Result<Option<DonationRecord>, StoreError> {
    let rows = db
        .select(Query::table(DONATIONS).eq("tx_reference", tx_reference).limit(1))
        .await?;
    Ok(from_rows(rows)?.into_iter().next())
}

pub async fn find_by_id(db: &dyn Database, id: &str) -> Result<Option<DonationRecord>, StoreError> {
    let rows = db.select(Query::table(DONATIONS).eq("id", id).limit(1)).await?;
    Ok(from_rows(rows)?.into_iter().next())
}

pub async fn find_by_tx_hash(
    db: &dyn Database,
    tx_hash: &str,
) -> Result<Option<DonationRecord>, StoreError> {
    let rows = db
        .select(Query::table(DONATIONS).eq("tx_hash", tx_hash).limit(1))
        .await?;
    Ok(from_rows(rows)?.into_iter().next())
}

pub async fn list_donations(
    db: &dyn Database,
    status: Option<DonationStatus>,
    limit: usize,
) -> Result<Vec<DonationRecord>, StoreError> {
    let mut query = Query::table(DONATIONS).order("created_at", false).limit(limit);
    if let Some(status) = status {
        query = query.eq("status", serde_json::to_value(status)?);
    }
    from_rows(db.select(query).await?)
}

/// Applies `patch` to one donation and returns the stored result.
pub async fn update_donation(
    db: &dyn Database,
    id: &str,
    mut patch: serde_json::Map<String, Value>,
) -> Result<Option<DonationRecord>, StoreError> {
    patch.insert("updated_at".to_string(), json!(Utc::now()));
    let rows = db.update(DONATIONS, &[Filter::eq("id", id)], patch).await?;
    Ok(from_rows(rows)?.into_iter().next())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub total_donated: f64,
    pub donation_count: i64,
    pub last_donation_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Adds a completed donation to its donor's running totals.
pub async fn record_donor(
    db: &dyn Database,
    donation: &DonationRecord,
) -> Result<Option<DonorRecord>, StoreError> {
    let Some(email) = donation.donor_email.as_deref() else {
        return Ok(None);
    };
    let email = email.to_lowercase();
    let now = Utc::now();

    let existing = db
        .select(Query::table(DONORS).eq("email", email.as_str()).limit(1))
        .await?;
    let existing: Option<DonorRecord> = from_rows(existing)?.into_iter().next();

    match existing {
        Some(donor) => {
            let patch = to_row(&json!({
                "name": donation.donor_name.clone().or(donor.name),
                "total_donated": donor.total_donated + donation.amount,
                "donation_count": donor.donation_count + 1,
                "last_donation_at": now,
            }))?;
            let rows = db.update(DONORS, &[Filter::eq("id", donor.id)], patch).await?;
            Ok(from_rows(rows)?.into_iter().next())
        }
        None => {
            let donor = DonorRecord {
                id: uuid::Uuid::new_v4().to_string(),
                email,
                name: donation.donor_name.clone(),
                total_donated: donation.amount,
                donation_count: 1,
                last_donation_at: now,
                created_at: now,
            };
            let row = db.insert(DONORS, to_row(&donor)?).await?;
            Ok(Some(from_row(row)?))
        }
    }
}

/// Credits the donor and tells the admins about a completed donation.
/// Neither step can undo the donation, so failures are only logged.
pub async fn announce_completion(db: &dyn Database, donation: &DonationRecord) {
    if let Err(e) = record_donor(db, donation).await {
        tracing::warn!("[DONATION] Donor totals not updated for {}: {}", donation.id, e);
    }

    let donor = donation.donor_name.as_deref().unwrap_or("Anonymous donor");
    let message = format!(
        "{} donated {:.2} {} via {} ({})",
        donor, donation.amount, donation.currency, donation.payment_method, donation.frequency
    );
    let priority = if donation.amount >= 1000.0 {
        Priority::High
    } else {
        Priority::Normal
    };
    notifications::notify(
        db,
        AdminNotification::new(
            NotificationKind::Success,
            "donation",
            "New donation received",
            message,
        )
        .with_priority(priority)
        .with_metadata(json!({
            "donationId": donation.id,
            "amount": donation.amount,
            "currency": donation.currency,
            "paymentMethod": donation.payment_method,
        })),
    )
    .await;
}

pub async fn list_donors(db: &dyn Database, limit: usize) -> Result<Vec<DonorRecord>, StoreError> {
    let rows = db
        .select(Query::table(DONORS).order("total_donated", false).limit(limit))
        .await?;
    from_rows(rows)
}
