use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use hope_foundation_api::{
    config::AppConfig,
    create_app,
    crypto_client::{CoinGeckoRates, EtherscanVerifier},
    paypal_client::HttpPayPal,
    rate_limit::{MemoryRateStore, RateLimitStore, RateLimiter, RedisRateStore},
    store::{Database, DbClients, MemoryDatabase, SupabaseClient},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if available
    dotenv().ok();

    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    for warning in config.validate() {
        tracing::warn!("[CONFIG] {}", warning);
    }

    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let db = database_clients(&config, &http_client);
    let paypal = Arc::new(HttpPayPal::new(config.paypal.clone(), http_client.clone()));
    let rates = Arc::new(CoinGeckoRates::new(
        http_client.clone(),
        &config.crypto.price_api_url,
    ));
    let chain = Arc::new(EtherscanVerifier::new(
        http_client.clone(),
        config.crypto.etherscan_api_key.clone(),
    ));

    let store: Arc<dyn RateLimitStore> = match config.rate_limit.redis_url.as_deref() {
        Some(url) => match RedisRateStore::new(url) {
            Ok(store) => {
                tracing::info!("[RATE] Using Redis rate-limit store");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!("[RATE] Redis unavailable ({}); using in-memory store", e);
                Arc::new(MemoryRateStore::new())
            }
        },
        None => Arc::new(MemoryRateStore::new()),
    };
    let limiter = RateLimiter::new(
        store,
        config.rate_limit.max_requests,
        config.rate_limit.window,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, db, paypal, rates, chain, limiter);
    let app = create_app(state);

    tracing::info!("Server listening on {}", addr);
    tracing::info!("   - Donations:    http://{}/api/donations", addr);
    tracing::info!("   - PayPal hook:  http://{}/api/payments/paypal/webhook", addr);
    tracing::info!("   - Health Check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Supabase when configured, otherwise a process-local database.
fn database_clients(config: &AppConfig, http_client: &reqwest::Client) -> DbClients {
    let Some(url) = config.supabase.url.as_deref() else {
        tracing::warn!("[DB] Using in-memory database; data is lost on restart");
        return DbClients::shared(Arc::new(MemoryDatabase::new()));
    };

    let client = |key: &Option<String>| {
        key.as_deref().map(|key| {
            Arc::new(SupabaseClient::new(http_client.clone(), url, key)) as Arc<dyn Database>
        })
    };
    DbClients::new(
        client(&config.supabase.service_role_key),
        client(&config.supabase.anon_key),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, shutting down gracefully");
}
