#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderValue, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use hope_foundation_api::{
    config::{AdminPolicy, AppConfig, CryptoConfig, RateLimitConfig, SupabaseConfig},
    create_app,
    crypto_client::{
        Asset, ChainVerifier, CryptoError, EtherscanVerifier, ExpectedTransfer, Network,
        StaticRates, TxStatus,
    },
    paypal_client::{
        Capture, Link, Money, NewOrder, NewPlan, NewSubscription, Order, PayPalApi, PayPalConfig,
        PayPalError, Payments, Plan, Product, PurchaseUnit, Subscription, WebhookHeaders,
    },
    rate_limit::{MemoryRateStore, RateLimiter},
    store::{DbClients, MemoryDatabase},
    AppState,
};

pub const SECRET: &str = "integration-test-secret";
pub const ETH_WALLET: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
pub const WEBHOOK_ID: &str = "WH-CONFIG-1";

pub fn config() -> AppConfig {
    let mut wallets = HashMap::new();
    wallets.insert(
        (Asset::Btc, Network::Bitcoin),
        vec!["bc1qtestwalletaddress".to_string()],
    );
    wallets.insert((Asset::Eth, Network::Ethereum), vec![ETH_WALLET.to_string()]);
    AppConfig {
        port: 0,
        site_url: "http://localhost:3000".to_string(),
        organization_name: "Hope Foundation".to_string(),
        http_timeout: Duration::from_secs(5),
        supabase: SupabaseConfig {
            jwt_secret: Some(SECRET.to_string()),
            ..Default::default()
        },
        paypal: PayPalConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            mode: "sandbox".to_string(),
            webhook_id: None,
        },
        crypto: CryptoConfig {
            wallets,
            etherscan_api_key: None,
            price_api_url: String::new(),
        },
        admin: AdminPolicy {
            email_domain: Some("@hopefoundation.org".to_string()),
            allowlist: vec![],
        },
        rate_limit: RateLimitConfig {
            max_requests: 100,
            window: Duration::from_secs(60),
            redis_url: None,
        },
    }
}

/// PayPal stand-in that records calls and answers from a script.
pub struct FakePayPal {
    pub script: Mutex<Script>,
}

pub struct Script {
    pub calls: Vec<String>,
    pub order_status: String,
    pub capture_status: String,
    pub subscription_status: String,
    pub fail_subscription: bool,
    pub webhook_valid: bool,
    pub custom_id: Option<String>,
    pub amount: Option<Money>,
}

impl FakePayPal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                calls: Vec::new(),
                order_status: "APPROVED".to_string(),
                capture_status: "COMPLETED".to_string(),
                subscription_status: "ACTIVE".to_string(),
                fail_subscription: false,
                webhook_valid: true,
                custom_id: None,
                amount: None,
            }),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: &str) {
        self.script.lock().unwrap().calls.push(call.to_string());
    }

    fn approve_link() -> Vec<Link> {
        vec![Link {
            href: "https://www.sandbox.paypal.com/checkoutnow?token=ORDER-1".to_string(),
            rel: "approve".to_string(),
            method: Some("GET".to_string()),
        }]
    }

    fn unit(&self, captures: Vec<Capture>) -> PurchaseUnit {
        let script = self.script.lock().unwrap();
        PurchaseUnit {
            amount: script.amount.clone(),
            custom_id: script.custom_id.clone(),
            description: None,
            payments: Some(Payments { captures }),
        }
    }
}

#[async_trait]
impl PayPalApi for FakePayPal {
    async fn create_order(&self, order: NewOrder) -> Result<Order, PayPalError> {
        self.record("create_order");
        {
            let mut script = self.script.lock().unwrap();
            script.custom_id = Some(order.custom_id.clone());
            script.amount = Some(order.amount.clone());
        }
        Ok(Order {
            id: "ORDER-1".to_string(),
            status: "CREATED".to_string(),
            links: Self::approve_link(),
            ..Default::default()
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, PayPalError> {
        self.record("get_order");
        let status = self.script.lock().unwrap().order_status.clone();
        Ok(Order {
            id: order_id.to_string(),
            status,
            purchase_units: vec![self.unit(vec![])],
            ..Default::default()
        })
    }

    async fn capture_order(&self, order_id: &str) -> Result<Order, PayPalError> {
        self.record("capture_order");
        let (status, amount) = {
            let script = self.script.lock().unwrap();
            (script.capture_status.clone(), script.amount.clone())
        };
        let capture = Capture {
            id: "CAPTURE-1".to_string(),
            status: "COMPLETED".to_string(),
            amount,
            custom_id: None,
        };
        Ok(Order {
            id: order_id.to_string(),
            status,
            purchase_units: vec![self.unit(vec![capture])],
            ..Default::default()
        })
    }

    async fn create_product(&self, _name: &str, _description: &str) -> Result<Product, PayPalError> {
        self.record("create_product");
        Ok(Product {
            id: "PROD-1".to_string(),
        })
    }

    async fn create_plan(&self, plan: NewPlan) -> Result<Plan, PayPalError> {
        self.record("create_plan");
        self.script.lock().unwrap().amount = Some(plan.price.clone());
        Ok(Plan {
            id: "PLAN-1".to_string(),
            status: Some("ACTIVE".to_string()),
        })
    }

    async fn deactivate_plan(&self, _plan_id: &str) -> Result<(), PayPalError> {
        self.record("deactivate_plan");
        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, PayPalError> {
        self.record("create_subscription");
        let mut script = self.script.lock().unwrap();
        if script.fail_subscription {
            return Err(PayPalError::Api {
                status: 422,
                message: "UNPROCESSABLE_ENTITY".to_string(),
            });
        }
        script.custom_id = Some(subscription.custom_id.clone());
        Ok(Subscription {
            id: "I-SUB1".to_string(),
            status: "APPROVAL_PENDING".to_string(),
            plan_id: Some(subscription.plan_id),
            links: Self::approve_link(),
            ..Default::default()
        })
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PayPalError> {
        self.record("get_subscription");
        let script = self.script.lock().unwrap();
        Ok(Subscription {
            id: subscription_id.to_string(),
            status: script.subscription_status.clone(),
            custom_id: script.custom_id.clone(),
            ..Default::default()
        })
    }

    async fn verify_webhook_signature(
        &self,
        _webhook_id: &str,
        _headers: &WebhookHeaders,
        _event: &Value,
    ) -> Result<bool, PayPalError> {
        self.record("verify_webhook_signature");
        Ok(self.script.lock().unwrap().webhook_valid)
    }
}

pub fn state_with(config: AppConfig, db: DbClients, paypal: Arc<FakePayPal>) -> AppState {
    state_with_chain(
        config,
        db,
        paypal,
        Arc::new(EtherscanVerifier::new(reqwest::Client::new(), None)),
    )
}

pub fn state_with_chain(
    config: AppConfig,
    db: DbClients,
    paypal: Arc<FakePayPal>,
    chain: Arc<dyn ChainVerifier>,
) -> AppState {
    let mut prices = HashMap::new();
    prices.insert(Asset::Btc, 50_000.0);
    prices.insert(Asset::Eth, 2_000.0);
    let limiter = RateLimiter::new(
        Arc::new(MemoryRateStore::new()),
        config.rate_limit.max_requests,
        config.rate_limit.window,
    );
    AppState::new(
        config,
        db,
        paypal,
        Arc::new(StaticRates { prices }),
        chain,
        limiter,
    )
}

/// Chain verifier that answers with a fixed status and records what it was asked.
pub struct FakeChain {
    pub status: TxStatus,
    pub seen: Mutex<Vec<ExpectedTransfer>>,
}

impl FakeChain {
    pub fn answering(status: TxStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChainVerifier for FakeChain {
    async fn check(
        &self,
        _network: Network,
        _tx_hash: &str,
        expected: &ExpectedTransfer,
    ) -> Result<TxStatus, CryptoError> {
        self.seen.lock().unwrap().push(expected.clone());
        Ok(self.status)
    }
}

/// App whose crypto confirmations are answered by `chain`.
pub fn app_with_chain(chain: Arc<FakeChain>) -> (Router, Arc<MemoryDatabase>) {
    let db = Arc::new(MemoryDatabase::new());
    let state = state_with_chain(config(), DbClients::shared(db.clone()), FakePayPal::new(), chain);
    (create_app(state), db)
}

/// App that checks PayPal webhook signatures against [`WEBHOOK_ID`].
pub fn app_with_webhook_id() -> (Router, Arc<MemoryDatabase>, Arc<FakePayPal>) {
    let mut config = config();
    config.paypal.webhook_id = Some(WEBHOOK_ID.to_string());
    let db = Arc::new(MemoryDatabase::new());
    let paypal = FakePayPal::new();
    let state = state_with(config, DbClients::shared(db.clone()), paypal.clone());
    (create_app(state), db, paypal)
}

/// Adds the transmission headers PayPal sends with every webhook.
pub fn with_paypal_headers(mut request: Request<Body>) -> Request<Body> {
    let headers = request.headers_mut();
    for (name, value) in [
        ("paypal-transmission-id", "tx-1"),
        ("paypal-transmission-time", "2026-01-01T00:00:00Z"),
        ("paypal-transmission-sig", "c2lnbmF0dXJl"),
        ("paypal-cert-url", "https://api.paypal.com/cert.pem"),
        ("paypal-auth-algo", "SHA256withRSA"),
    ] {
        headers.insert(name, HeaderValue::from_static(value));
    }
    request
}

/// App over a fresh in-memory database. The database handle is returned for
/// seeding and inspection.
pub fn app() -> (Router, Arc<MemoryDatabase>, Arc<FakePayPal>) {
    let db = Arc::new(MemoryDatabase::new());
    let paypal = FakePayPal::new();
    let state = state_with(config(), DbClients::shared(db.clone()), paypal.clone());
    (create_app(state), db, paypal)
}

pub fn token(email: &str, role: Option<&str>) -> String {
    signed(&json!({
        "sub": format!("user-{}", email),
        "email": email,
        "exp": chrono::Utc::now().timestamp() + 3600,
        "app_metadata": { "role": role },
    }))
}

/// HS256 token over arbitrary claims, signed with the test secret.
pub fn signed(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "HS256", "typ": "JWT" }).to_string());
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}

pub fn admin_token() -> String {
    token("director@hopefoundation.org", None)
}

pub fn moderator_token() -> String {
    token("editor@gmail.com", Some("moderator"))
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "198.51.100.7");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    builder.body(body).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}
