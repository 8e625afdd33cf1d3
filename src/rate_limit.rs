// src/rate_limit.rs
// Fixed-window request limiting over a pluggable store (memory or Redis).

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    /// Unix time in milliseconds at which the window resets.
    pub reset_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt rate window: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, RateLimitError>;

    /// Stores `window`; the entry disappears after `ttl`.
    async fn set(&self, key: &str, window: RateWindow, ttl: Duration) -> Result<(), RateLimitError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORES
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local; only correct for a single server instance.
#[derive(Default)]
pub struct MemoryRateStore {
    entries: RwLock<HashMap<String, (RateWindow, i64)>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateStore {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, RateLimitError> {
        let now = Utc::now().timestamp_millis();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((window, expires_at)) if *expires_at > now => return Ok(Some(*window)),
                None => return Ok(None),
                Some(_) => {}
            }
        }
        // expired
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, window: RateWindow, ttl: Duration) -> Result<(), RateLimitError> {
        let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, exp)| *exp > Utc::now().timestamp_millis());
        entries.insert(key.to_string(), (window, expires_at));
        Ok(())
    }
}

/// Shared across instances through Redis key expiry.
pub struct RedisRateStore {
    client: redis::Client,
}

impl RedisRateStore {
    pub fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateStore {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, RateLimitError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = con.get(format!("ratelimit:{}", key)).await?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn set(&self, key: &str, window: RateWindow, ttl: Duration) -> Result<(), RateLimitError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(&window)?;
        let _: () = con
            .set_ex(format!("ratelimit:{}", key), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIMITER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: i64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
        }
    }

    pub async fn check(&self, identifier: &str) -> RateDecision {
        self.check_at(identifier, Utc::now().timestamp_millis()).await
    }

    /// Counts one request for `identifier` at `now` (unix ms). A store
    /// failure lets the request through.
    pub async fn check_at(&self, identifier: &str, now: i64) -> RateDecision {
        let window_ms = self.window.as_millis() as i64;

        let current = match self.store.get(identifier).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!("[RATE] Store unavailable, allowing {}: {}", identifier, e);
                return RateDecision {
                    allowed: true,
                    remaining: self.max_requests,
                    reset_at: now + window_ms,
                };
            }
        };

        let window = match current {
            Some(w) if w.reset_at > now => RateWindow {
                count: w.count.saturating_add(1),
                reset_at: w.reset_at,
            },
            _ => RateWindow {
                count: 1,
                reset_at: now + window_ms,
            },
        };

        let allowed = window.count <= self.max_requests;
        if allowed {
            let ttl = Duration::from_millis((window.reset_at - now).max(1) as u64);
            if let Err(e) = self.store.set(identifier, window, ttl).await {
                tracing::warn!("[RATE] Could not persist window for {}: {}", identifier, e);
            }
        }

        RateDecision {
            allowed,
            remaining: self.max_requests.saturating_sub(window.count),
            reset_at: window.reset_at,
        }
    }
}

/// Best-effort client identity behind a proxy.
pub fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware: one window per (path, client).
pub async fn limit_requests(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let key = format!(
        "{}:{}",
        request.uri().path(),
        client_identifier(request.headers())
    );
    let decision = limiter.check(&key).await;

    if !decision.allowed {
        let retry_after_ms = (decision.reset_at - Utc::now().timestamp_millis()).max(0);
        tracing::warn!("[RATE] Limited {}", key);
        return AppError::RateLimited {
            retry_after_secs: ((retry_after_ms + 999) / 1000) as u64,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        response.headers_mut().insert("x-ratelimit-remaining", value);
    }
    response
}
