// src/auth.rs
// Supabase access-token verification, role derivation, route guards.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::admin_handler::{AdminRole, AdminUser, ADMIN_USERS};
use crate::config::AdminPolicy;
use crate::error::AppError;
use crate::store::{from_rows, Database, Query};
use crate::AppState;

pub mod context;

pub use context::{AuthContext, AuthEvent};

type HmacSha256 = Hmac<Sha256>;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MODERATOR: &str = "moderator";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AuthError {
    #[error("Token verification is not configured")]
    NotConfigured,
    #[error("Malformed token")]
    Malformed,
    #[error("Unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("Invalid token signature")]
    BadSignature,
    #[error("Token expired")]
    Expired,
    #[error("Token does not belong to a user")]
    NoSubject,
}

/// Claims of a Supabase access token that matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub app_metadata: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserMetadata {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl UserMetadata {
    /// Roles come from `app_metadata` only; `user_metadata` is writable by
    /// the user and never grants anything.
    pub fn from_app_metadata(app_metadata: &Value) -> Self {
        serde_json::from_value(app_metadata.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub metadata: UserMetadata,
    /// Email matched the configured admin domain/allowlist.
    #[serde(skip)]
    pub email_allowlisted: bool,
    /// Deactivated in `admin_users`; holds no roles at all.
    #[serde(skip)]
    pub disabled: bool,
}

impl AuthUser {
    pub fn new(id: &str, email: Option<&str>, metadata: UserMetadata, policy: &AdminPolicy) -> Self {
        Self {
            id: id.to_string(),
            email: email.map(str::to_string),
            email_allowlisted: email.map(|e| policy.matches_email(e)).unwrap_or(false),
            disabled: false,
            metadata,
        }
    }

    /// An `admin_users` row overrides the token's role; an inactive row
    /// disables every role, including one granted by email.
    pub fn apply_directory(&mut self, entry: &AdminUser) {
        if !entry.active {
            self.disabled = true;
            return;
        }
        let role = match entry.role {
            AdminRole::Admin => ROLE_ADMIN,
            AdminRole::Moderator | AdminRole::Editor => ROLE_MODERATOR,
        };
        self.metadata.role = Some(role.to_string());
    }

    pub fn role(&self) -> Option<&str> {
        self.metadata.role.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        !self.disabled && (self.email_allowlisted || self.role() == Some(ROLE_ADMIN))
    }

    pub fn is_moderator(&self) -> bool {
        self.is_admin() || (!self.disabled && self.role() == Some(ROLE_MODERATOR))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin()
            || (!self.disabled && self.metadata.permissions.iter().any(|p| p == permission))
    }

    pub fn email_or_id(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// `None` (signed out) is never an admin.
pub fn is_admin(user: Option<&AuthUser>) -> bool {
    user.map(AuthUser::is_admin).unwrap_or(false)
}

pub fn is_moderator(user: Option<&AuthUser>) -> bool {
    user.map(AuthUser::is_moderator).unwrap_or(false)
}

pub fn has_permission(user: Option<&AuthUser>, permission: &str) -> bool {
    user.map(|u| u.has_permission(permission)).unwrap_or(false)
}

pub struct TokenVerifier {
    secret: Option<String>,
    policy: AdminPolicy,
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

impl TokenVerifier {
    pub fn new(secret: Option<String>, policy: AdminPolicy) -> Self {
        Self { secret, policy }
    }

    pub fn policy(&self) -> &AdminPolicy {
        &self.policy
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let secret = self.secret.as_deref().ok_or(AuthError::NotConfigured)?;

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header: Value = decode_segment(header_b64)?;
        if header["alg"] != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64.trim_end_matches('='))
            .map_err(|_| AuthError::Malformed)?;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::NotConfigured)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        // Constant-time comparison
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        let sub = claims
            .sub
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::NoSubject)?;

        let metadata = UserMetadata::from_app_metadata(&claims.app_metadata);
        Ok(AuthUser::new(sub, claims.email.as_deref(), metadata, &self.policy))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        let mut user = state.auth.verify(token).map_err(|e| {
            tracing::warn!("[AUTH] Rejected token: {}", e);
            AppError::Unauthorized(e.to_string())
        })?;

        if let (Some(db), Some(email)) = (state.db.preferred(), user.email.clone()) {
            if let Some(entry) = directory_entry(db.as_ref(), &email).await? {
                user.apply_directory(&entry);
            }
        }
        Ok(user)
    }
}

async fn directory_entry(db: &dyn Database, email: &str) -> Result<Option<AdminUser>, AppError> {
    let rows = db
        .select(
            Query::table(ADMIN_USERS)
                .eq("email", email.trim().to_lowercase())
                .limit(1),
        )
        .await?;
    Ok(from_rows::<AdminUser>(rows)?.into_iter().next())
}

/// Verified user holding the admin role.
pub struct RequireAdmin(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!("[AUTH] {} is not an admin", user.email_or_id());
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(RequireAdmin(user))
    }
}

/// Verified user holding the moderator or admin role.
pub struct RequireModerator(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireModerator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_moderator() {
            return Err(AppError::Forbidden("Moderator access required".to_string()));
        }
        Ok(RequireModerator(user))
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/auth/session", get(session))
}

async fn session(State(_state): State<AppState>, user: AuthUser) -> Json<Value> {
    Json(json!({
        "user": user,
        "isAdmin": user.is_admin(),
        "isModerator": user.is_moderator(),
    }))
}
