// src/paypal_client.rs
// PayPal REST client: OAuth token cache, orders, billing plans, subscriptions.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: String, // "sandbox" or "live"
    pub webhook_id: Option<String>,
}

impl PayPalConfig {
    pub fn from_env() -> Self {
        let var = |names: &[&str]| {
            names
                .iter()
                .filter_map(|n| std::env::var(n).ok())
                .find(|v| !v.trim().is_empty())
                .unwrap_or_default()
        };
        let webhook_id = var(&["PAYPAL_WEBHOOK_ID"]);
        Self {
            client_id: var(&["PAYPAL_CLIENT_ID", "NEXT_PUBLIC_PAYPAL_CLIENT_ID"]),
            client_secret: var(&["PAYPAL_CLIENT_SECRET"]),
            mode: std::env::var("PAYPAL_MODE").unwrap_or_else(|_| "sandbox".to_string()),
            webhook_id: (!webhook_id.is_empty()).then_some(webhook_id),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn base_url(&self) -> &str {
        if self.mode == "live" {
            "https://api-m.paypal.com"
        } else {
            "https://api-m.sandbox.paypal.com"
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayPalError {
    #[error("PayPal is not configured")]
    NotConfigured,

    #[error("PayPal request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("PayPal authentication failed: {0}")]
    Auth(String),

    #[error("PayPal API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered, but not with what the flow requires.
    #[error("{0}")]
    UnexpectedState(String),

    #[error("Invalid PayPal id: {0:?}")]
    InvalidId(String),
}

impl From<PayPalError> for crate::error::AppError {
    fn from(err: PayPalError) -> Self {
        match err {
            PayPalError::InvalidId(_) => crate::error::AppError::Validation(err.to_string()),
            _ => crate::error::AppError::Provider(err.to_string()),
        }
    }
}

/// PayPal order, plan and subscription ids are short `[A-Za-z0-9-]` tokens.
pub fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Ids end up in URL paths; anything else is refused before a request is made.
fn resource_id(id: &str) -> Result<&str, PayPalError> {
    if is_valid_resource_id(id) {
        Ok(id)
    } else {
        Err(PayPalError::InvalidId(id.chars().take(64).collect()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL API TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(default)]
    pub method: Option<String>,
}

/// Href of the `rel == "approve"` link, where the payer is sent.
pub fn approval_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|link| link.rel == "approve")
        .map(|link| link.href.clone())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Money {
    pub currency_code: String,
    pub value: String,
}

impl Money {
    pub fn new(currency: &str, amount: f64) -> Self {
        Self {
            currency_code: currency.to_uppercase(),
            value: format!("{:.2}", amount),
        }
    }

    pub fn amount(&self) -> f64 {
        self.value.parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Capture {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Payments {
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PurchaseUnit {
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payments: Option<Payments>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PayerName {
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

impl PayerName {
    pub fn full(&self) -> Option<String> {
        let parts: Vec<&str> = [self.given_name.as_deref(), self.surname.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Payer {
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub name: Option<PayerName>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Order {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
    #[serde(default)]
    pub payer: Option<Payer>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Order {
    pub fn custom_id(&self) -> Option<&str> {
        self.purchase_units
            .iter()
            .find_map(|unit| unit.custom_id.as_deref())
    }

    pub fn first_capture(&self) -> Option<&Capture> {
        self.purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LastPayment {
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BillingInfo {
    #[serde(default)]
    pub last_payment: Option<LastPayment>,
    #[serde(default)]
    pub next_billing_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Subscriber {
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub name: Option<PayerName>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub subscriber: Option<Subscriber>,
    #[serde(default)]
    pub billing_info: Option<BillingInfo>,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Billing interval of a recurring plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Month,
    Year,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Month => "MONTH",
            Interval::Year => "YEAR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub amount: Money,
    pub description: String,
    pub custom_id: String,
    pub brand_name: String,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub product_id: String,
    pub name: String,
    pub price: Money,
    pub interval: Interval,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub plan_id: String,
    pub subscriber_name: Option<String>,
    pub subscriber_email: Option<String>,
    pub custom_id: String,
    pub brand_name: String,
    pub return_url: String,
    pub cancel_url: String,
}

impl NewOrder {
    pub fn to_body(&self) -> Value {
        json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": self.amount,
                "description": self.description,
                "custom_id": self.custom_id,
            }],
            "application_context": {
                "brand_name": self.brand_name,
                "landing_page": "NO_PREFERENCE",
                "user_action": "PAY_NOW",
                "return_url": self.return_url,
                "cancel_url": self.cancel_url,
            }
        })
    }
}

impl NewPlan {
    pub fn to_body(&self) -> Value {
        json!({
            "product_id": self.product_id,
            "name": self.name,
            "status": "ACTIVE",
            "billing_cycles": [{
                "frequency": { "interval_unit": self.interval.as_str(), "interval_count": 1 },
                "tenure_type": "REGULAR",
                "sequence": 1,
                // 0 = bills until cancelled
                "total_cycles": 0,
                "pricing_scheme": { "fixed_price": self.price },
            }],
            "payment_preferences": {
                "auto_bill_outstanding": true,
                "setup_fee_failure_action": "CONTINUE",
                "payment_failure_threshold": 3,
            }
        })
    }
}

impl NewSubscription {
    pub fn to_body(&self) -> Value {
        let mut subscriber = json!({});
        if let Some(name) = &self.subscriber_name {
            let mut parts = name.trim().splitn(2, ' ');
            let given = parts.next().unwrap_or_default();
            let surname = parts.next().unwrap_or_default();
            subscriber["name"] = json!({ "given_name": given, "surname": surname });
        }
        if let Some(email) = &self.subscriber_email {
            subscriber["email_address"] = json!(email);
        }
        json!({
            "plan_id": self.plan_id,
            "custom_id": self.custom_id,
            "subscriber": subscriber,
            "application_context": {
                "brand_name": self.brand_name,
                "user_action": "SUBSCRIBE_NOW",
                "return_url": self.return_url,
                "cancel_url": self.cancel_url,
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL API SEAM
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait PayPalApi: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> Result<Order, PayPalError>;
    async fn get_order(&self, order_id: &str) -> Result<Order, PayPalError>;
    async fn capture_order(&self, order_id: &str) -> Result<Order, PayPalError>;
    async fn create_product(&self, name: &str, description: &str) -> Result<Product, PayPalError>;
    async fn create_plan(&self, plan: NewPlan) -> Result<Plan, PayPalError>;
    async fn deactivate_plan(&self, plan_id: &str) -> Result<(), PayPalError>;
    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, PayPalError>;
    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PayPalError>;

    /// Asks PayPal whether a webhook delivery is authentic.
    async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        headers: &WebhookHeaders,
        event: &Value,
    ) -> Result<bool, PayPalError>;
}

/// Transmission headers PayPal attaches to each webhook delivery.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub transmission_id: String,
    pub transmission_time: String,
    pub transmission_sig: String,
    pub cert_url: String,
    pub auth_algo: String,
}

impl WebhookHeaders {
    pub fn from_map(headers: &axum::http::HeaderMap) -> Option<Self> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Some(Self {
            transmission_id: get("paypal-transmission-id")?,
            transmission_time: get("paypal-transmission-time")?,
            transmission_sig: get("paypal-transmission-sig")?,
            cert_url: get("paypal-cert-url")?,
            auth_algo: get("paypal-auth-algo")?,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct HttpPayPal {
    pub config: PayPalConfig,
    pub http_client: Client,
    pub auth_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

impl HttpPayPal {
    pub fn new(config: PayPalConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
            auth_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Get valid access token (Cached or Refreshed)
    pub async fn get_access_token(&self) -> Result<String, PayPalError> {
        if !self.config.is_configured() {
            return Err(PayPalError::NotConfigured);
        }

        {
            let token_lock = self.auth_token.read().await;
            if let Some((token, expiry)) = &*token_lock {
                if *expiry > Utc::now() {
                    return Ok(token.clone());
                }
            }
        }

        let auth_str = format!("{}:{}", self.config.client_id, self.config.client_secret);
        let auth_basic = STANDARD.encode(auth_str);

        let url = format!("{}/v1/oauth2/token", self.config.base_url());
        let params = [("grant_type", "client_credentials")];

        let resp = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Basic {}", auth_basic))
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PayPalError::Auth(resp.status().to_string()));
        }

        let body: Value = resp.json().await?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| PayPalError::Auth("No access_token field".to_string()))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(3600);

        // Expire a minute early.
        let mut token_lock = self.auth_token.write().await;
        *token_lock = Some((
            access_token.clone(),
            Utc::now() + chrono::Duration::seconds(expires_in - 60),
        ));

        Ok(access_token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, PayPalError> {
        let token = self.get_access_token().await?;
        let url = format!("{}{}", self.config.base_url(), path);

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body["message"]
                .as_str()
                .or_else(|| body["error_description"].as_str())
                .unwrap_or("unknown error")
                .to_string();
            tracing::error!("[PAYPAL] {} {} -> {}: {}", path, status, body["name"], message);
            return Err(PayPalError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Some endpoints (deactivate) answer 204 with an empty body.
        let bytes = resp.bytes().await?;
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| PayPalError::UnexpectedState(format!("Invalid PayPal JSON: {}", e)))?
        };
        serde_json::from_value(value)
            .map_err(|e| PayPalError::UnexpectedState(format!("Unexpected PayPal response: {}", e)))
    }
}

#[async_trait]
impl PayPalApi for HttpPayPal {
    async fn create_order(&self, order: NewOrder) -> Result<Order, PayPalError> {
        self.send(reqwest::Method::POST, "/v2/checkout/orders", Some(order.to_body()))
            .await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, PayPalError> {
        let path = format!("/v2/checkout/orders/{}", resource_id(order_id)?);
        self.send(reqwest::Method::GET, &path, None).await
    }

    async fn capture_order(&self, order_id: &str) -> Result<Order, PayPalError> {
        let path = format!("/v2/checkout/orders/{}/capture", resource_id(order_id)?);
        self.send(reqwest::Method::POST, &path, Some(json!({}))).await
    }

    async fn create_product(&self, name: &str, description: &str) -> Result<Product, PayPalError> {
        let body = json!({
            "name": name,
            "description": description,
            "type": "SERVICE",
            "category": "CHARITY",
        });
        self.send(reqwest::Method::POST, "/v1/catalogs/products", Some(body))
            .await
    }

    async fn create_plan(&self, plan: NewPlan) -> Result<Plan, PayPalError> {
        self.send(reqwest::Method::POST, "/v1/billing/plans", Some(plan.to_body()))
            .await
    }

    async fn deactivate_plan(&self, plan_id: &str) -> Result<(), PayPalError> {
        let path = format!("/v1/billing/plans/{}/deactivate", resource_id(plan_id)?);
        let _: Value = self.send(reqwest::Method::POST, &path, None).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, PayPalError> {
        self.send(
            reqwest::Method::POST,
            "/v1/billing/subscriptions",
            Some(subscription.to_body()),
        )
        .await
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PayPalError> {
        let path = format!("/v1/billing/subscriptions/{}", resource_id(subscription_id)?);
        self.send(reqwest::Method::GET, &path, None).await
    }

    async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        headers: &WebhookHeaders,
        event: &Value,
    ) -> Result<bool, PayPalError> {
        let body = json!({
            "auth_algo": headers.auth_algo,
            "cert_url": headers.cert_url,
            "transmission_id": headers.transmission_id,
            "transmission_sig": headers.transmission_sig,
            "transmission_time": headers.transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });
        let resp: Value = self
            .send(
                reqwest::Method::POST,
                "/v1/notifications/verify-webhook-signature",
                Some(body),
            )
            .await?;
        Ok(resp["verification_status"] == "SUCCESS")
    }
}
