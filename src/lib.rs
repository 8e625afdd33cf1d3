// src/lib.rs
// Hope Foundation API: donations, content publishing and admin tooling.

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod admin_handler;
pub mod auth;
pub mod config;
pub mod content;
pub mod content_handler;
pub mod crypto_client;
pub mod crypto_handler;
pub mod donation;
pub mod error;
pub mod notifications;
pub mod payment_service;
pub mod paypal_client;
pub mod paypal_handler;
pub mod rate_limit;
pub mod store;
pub mod volunteer_handler;

use auth::TokenVerifier;
use config::AppConfig;
use crypto_client::{ChainVerifier, RateSource};
use paypal_client::PayPalApi;
use rate_limit::RateLimiter;
use store::DbClients;

/// Everything a handler may reach. Providers sit behind traits so tests can
/// swap them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbClients,
    pub paypal: Arc<dyn PayPalApi>,
    pub rates: Arc<dyn RateSource>,
    pub chain: Arc<dyn ChainVerifier>,
    pub auth: Arc<TokenVerifier>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbClients,
        paypal: Arc<dyn PayPalApi>,
        rates: Arc<dyn RateSource>,
        chain: Arc<dyn ChainVerifier>,
        limiter: RateLimiter,
    ) -> Self {
        let auth = TokenVerifier::new(config.supabase.jwt_secret.clone(), config.admin.clone());
        Self {
            config: Arc::new(config),
            db,
            paypal,
            rates,
            chain,
            auth: Arc::new(auth),
            limiter,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    // Public write endpoints get a per-client request budget.
    let limited = Router::new()
        .merge(payment_service::router())
        .merge(paypal_handler::checkout_router())
        .merge(crypto_handler::checkout_router())
        .merge(volunteer_handler::router())
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit::limit_requests,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(limited)
        .merge(paypal_handler::router())
        .merge(crypto_handler::router())
        .merge(content_handler::router())
        .merge(admin_handler::router())
        .merge(notifications::router())
        .merge(auth::router())
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
