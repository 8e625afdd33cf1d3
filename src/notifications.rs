// src/notifications.rs
// Admin notifications: raised by server actions, read and cleared by admins.

use axum::{
    extract::{Query as QueryParams, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::RequireAdmin;
use crate::error::AppError;
use crate::store::{from_row, from_rows, to_row, Database, Filter, Query, StoreError};
use crate::AppState;

pub const NOTIFICATIONS: &str = "notifications";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminNotification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub category: String,
    pub priority: Priority,
    pub read: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AdminNotification {
    pub fn new(kind: NotificationKind, category: &str, title: &str, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            message,
            kind,
            category: category.to_string(),
            priority: Priority::Normal,
            read: false,
            user_id: None,
            metadata: json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub async fn create(
    db: &dyn Database,
    notification: &AdminNotification,
) -> Result<AdminNotification, StoreError> {
    let row = db.insert(NOTIFICATIONS, to_row(notification)?).await?;
    from_row(row)
}

/// Raises a notification without failing the caller; the action it reports
/// has already happened.
pub async fn notify(db: &dyn Database, notification: AdminNotification) {
    if let Err(e) = create(db, &notification).await {
        tracing::warn!("[NOTIFY] Could not store '{}': {}", notification.title, e);
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/admin/notifications",
            get(list_notifications)
                .put(mark_read)
                .delete(delete_notification),
        )
        .route("/api/admin/notifications/read-all", put(mark_all_read))
}

fn database(state: &AppState) -> Result<std::sync::Arc<dyn Database>, AppError> {
    state
        .db
        .preferred()
        .ok_or_else(|| AppError::Config("Database is not configured".to_string()))
}

async fn list_notifications(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    QueryParams(params): QueryParams<NotificationQuery>,
) -> Result<Json<Vec<AdminNotification>>, AppError> {
    let db = database(&state)?;
    let mut query = Query::table(NOTIFICATIONS)
        .order("created_at", false)
        .limit(params.limit.unwrap_or(50).min(200));
    if params.unread == Some(true) {
        query = query.eq("read", false);
    }
    Ok(Json(from_rows(db.select(query).await?)?))
}

async fn mark_read(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    QueryParams(params): QueryParams<NotificationQuery>,
) -> Result<Json<AdminNotification>, AppError> {
    let id = params
        .id
        .ok_or_else(|| AppError::Validation("Notification id is required".to_string()))?;
    let db = database(&state)?;
    let rows = db
        .update(
            NOTIFICATIONS,
            &[Filter::eq("id", id.as_str())],
            to_row(&json!({ "read": true }))?,
        )
        .await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
    Ok(Json(from_row(row)?))
}

async fn mark_all_read(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Value>, AppError> {
    let db = database(&state)?;
    let rows = db
        .update(
            NOTIFICATIONS,
            &[Filter::eq("read", false)],
            to_row(&json!({ "read": true }))?,
        )
        .await?;
    Ok(Json(json!({ "success": true, "updated": rows.len() })))
}

async fn delete_notification(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    QueryParams(params): QueryParams<NotificationQuery>,
) -> Result<Json<Value>, AppError> {
    let id = params
        .id
        .ok_or_else(|| AppError::Validation("Notification id is required".to_string()))?;
    let db = database(&state)?;
    let deleted = db
        .delete(NOTIFICATIONS, &[Filter::eq("id", id.as_str())])
        .await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound(format!("Notification {} not found", id)));
    }
    tracing::info!("[NOTIFY] {} deleted notification {}", admin.email_or_id(), id);
    Ok(Json(json!({ "success": true })))
}
