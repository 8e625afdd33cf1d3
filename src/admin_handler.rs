// src/admin_handler.rs
// Admin-only tooling: admin users, form options, donation/donor/volunteer lists.

use axum::{
    extract::{Path, Query as QueryParams, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::auth::RequireAdmin;
use crate::content::slugify;
use crate::donation::{self, is_valid_email, DonationRecord, DonationStatus, DonorRecord};
use crate::error::AppError;
use crate::store::{from_row, from_rows, to_row, Database, Filter, Query};
use crate::volunteer_handler::{self, Volunteer, VolunteerStatus};
use crate::AppState;

pub const ADMIN_USERS: &str = "admin_users";
pub const FORM_OPTIONS: &str = "form_options";

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Admin,
    Moderator,
    Editor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: AdminRole,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default = "active_default")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn active_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAdminUser {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: AdminRole,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserPatch {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<AdminRole>,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormOption {
    pub id: String,
    pub category: String,
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "active_default")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FormOptionInput {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/admin/users",
            get(list_admin_users)
                .post(create_admin_user)
                .put(update_admin_user)
                .delete(delete_admin_user),
        )
        .route(
            "/api/admin/form-options/:category",
            get(list_form_options)
                .post(create_form_option)
                .put(update_form_option)
                .delete(delete_form_option),
        )
        .route("/api/form-options/:category", get(public_form_options))
        .route("/api/admin/donations", get(list_donations))
        .route("/api/admin/donors", get(list_donors))
        .route("/api/admin/volunteers", get(list_volunteers))
}

fn database(state: &AppState) -> Result<Arc<dyn Database>, AppError> {
    state
        .db
        .preferred()
        .ok_or_else(|| AppError::Config("Database is not configured".to_string()))
}

fn first<T: serde::de::DeserializeOwned>(
    rows: Vec<crate::store::Row>,
    missing: impl FnOnce() -> String,
) -> Result<T, AppError> {
    from_rows::<T>(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(missing()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADMIN USERS
// ═══════════════════════════════════════════════════════════════════════════════

async fn list_admin_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<AdminUser>>, AppError> {
    let db = database(&state)?;
    let rows = db
        .select(Query::table(ADMIN_USERS).order("created_at", false))
        .await?;
    Ok(Json(from_rows(rows)?))
}

async fn create_admin_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(input): Json<NewAdminUser>,
) -> Result<(StatusCode, Json<AdminUser>), AppError> {
    let email = input.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    let db = database(&state)?;

    let existing = db
        .select(Query::table(ADMIN_USERS).eq("email", email.as_str()).limit(1))
        .await?;
    if !existing.is_empty() {
        return Err(AppError::Validation(format!("{} is already an admin user", email)));
    }

    let now = Utc::now();
    let user = AdminUser {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        full_name: input.full_name.filter(|n| !n.trim().is_empty()),
        role: input.role,
        permissions: input.permissions,
        active: true,
        created_at: now,
        updated_at: now,
    };
    let stored: AdminUser = from_row(db.insert(ADMIN_USERS, to_row(&user)?).await?)?;
    tracing::info!(
        "[ADMIN] {} added {} as {:?}",
        admin.email_or_id(),
        stored.email,
        stored.role
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_admin_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    QueryParams(IdQuery { id }): QueryParams<IdQuery>,
    Json(input): Json<AdminUserPatch>,
) -> Result<Json<AdminUser>, AppError> {
    let db = database(&state)?;
    let mut patch = Map::new();
    if let Some(full_name) = input.full_name {
        patch.insert("full_name".into(), json!(full_name));
    }
    if let Some(role) = input.role {
        patch.insert("role".into(), json!(role));
    }
    if let Some(permissions) = input.permissions {
        patch.insert("permissions".into(), json!(permissions));
    }
    if let Some(active) = input.active {
        patch.insert("active".into(), json!(active));
    }
    if patch.is_empty() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }
    patch.insert("updated_at".into(), json!(Utc::now()));

    let rows = db
        .update(ADMIN_USERS, &[Filter::eq("id", id.as_str())], patch)
        .await?;
    let updated: AdminUser = first(rows, || format!("Admin user {} not found", id))?;
    tracing::info!("[ADMIN] {} updated admin user {}", admin.email_or_id(), updated.email);
    Ok(Json(updated))
}

async fn delete_admin_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    QueryParams(IdQuery { id }): QueryParams<IdQuery>,
) -> Result<Json<Value>, AppError> {
    let db = database(&state)?;
    let deleted = db
        .delete(ADMIN_USERS, &[Filter::eq("id", id.as_str())])
        .await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound(format!("Admin user {} not found", id)));
    }
    tracing::info!("[ADMIN] {} removed admin user {}", admin.email_or_id(), id);
    Ok(Json(json!({ "success": true })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORM OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

async fn options_for(
    db: &dyn Database,
    category: &str,
    active_only: bool,
) -> Result<Vec<FormOption>, AppError> {
    let mut query = Query::table(FORM_OPTIONS)
        .eq("category", category)
        .order("sort_order", true);
    if active_only {
        query = query.eq("active", true);
    }
    Ok(from_rows(db.select(query).await?)?)
}

async fn list_form_options(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(category): Path<String>,
) -> Result<Json<Vec<FormOption>>, AppError> {
    let db = database(&state)?;
    Ok(Json(options_for(db.as_ref(), &category, false).await?))
}

/// Active options only, for public forms; empty without a database.
async fn public_form_options(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<FormOption>>, AppError> {
    match state.db.preferred() {
        Some(db) => Ok(Json(options_for(db.as_ref(), &category, true).await?)),
        None => Ok(Json(Vec::new())),
    }
}

async fn create_form_option(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(category): Path<String>,
    Json(input): Json<FormOptionInput>,
) -> Result<(StatusCode, Json<FormOption>), AppError> {
    let label = input
        .label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::Validation("Label is required".to_string()))?;
    let value = input
        .value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| slugify(&label));
    let db = database(&state)?;

    let sort_order = match input.sort_order {
        Some(order) => order,
        None => options_for(db.as_ref(), &category, false)
            .await?
            .iter()
            .map(|o| o.sort_order + 1)
            .max()
            .unwrap_or(0),
    };
    let option = FormOption {
        id: uuid::Uuid::new_v4().to_string(),
        category,
        label,
        value,
        sort_order,
        active: input.active.unwrap_or(true),
    };
    let stored: FormOption = from_row(db.insert(FORM_OPTIONS, to_row(&option)?).await?)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_form_option(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(category): Path<String>,
    QueryParams(IdQuery { id }): QueryParams<IdQuery>,
    Json(input): Json<FormOptionInput>,
) -> Result<Json<FormOption>, AppError> {
    let db = database(&state)?;
    let mut patch = Map::new();
    if let Some(label) = input.label.filter(|l| !l.trim().is_empty()) {
        patch.insert("label".into(), json!(label.trim()));
    }
    if let Some(value) = input.value.filter(|v| !v.trim().is_empty()) {
        patch.insert("value".into(), json!(value.trim()));
    }
    if let Some(sort_order) = input.sort_order {
        patch.insert("sort_order".into(), json!(sort_order));
    }
    if let Some(active) = input.active {
        patch.insert("active".into(), json!(active));
    }
    if patch.is_empty() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }

    let filters = [
        Filter::eq("id", id.as_str()),
        Filter::eq("category", category.as_str()),
    ];
    let rows = db.update(FORM_OPTIONS, &filters, patch).await?;
    Ok(Json(first(rows, || format!("Option {} not found in {}", id, category))?))
}

async fn delete_form_option(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(category): Path<String>,
    QueryParams(IdQuery { id }): QueryParams<IdQuery>,
) -> Result<Json<Value>, AppError> {
    let db = database(&state)?;
    let filters = [
        Filter::eq("id", id.as_str()),
        Filter::eq("category", category.as_str()),
    ];
    if db.delete(FORM_OPTIONS, &filters).await?.is_empty() {
        return Err(AppError::NotFound(format!("Option {} not found in {}", id, category)));
    }
    Ok(Json(json!({ "success": true })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// DONATIONS, DONORS, VOLUNTEERS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_status<T: serde::de::DeserializeOwned>(raw: Option<&str>) -> Result<Option<T>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            serde_json::from_value(json!(s))
                .map_err(|_| AppError::Validation(format!("Unknown status: {}", s)))
        })
        .transpose()
}

async fn list_donations(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<Json<Vec<DonationRecord>>, AppError> {
    let db = database(&state)?;
    let status: Option<DonationStatus> = parse_status(query.status.as_deref())?;
    Ok(Json(
        donation::list_donations(db.as_ref(), status, query.limit()).await?,
    ))
}

async fn list_donors(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<Json<Vec<DonorRecord>>, AppError> {
    let db = database(&state)?;
    Ok(Json(donation::list_donors(db.as_ref(), query.limit()).await?))
}

async fn list_volunteers(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<Json<Vec<Volunteer>>, AppError> {
    let db = database(&state)?;
    let status: Option<VolunteerStatus> = parse_status(query.status.as_deref())?;
    Ok(Json(
        volunteer_handler::list_volunteers(db.as_ref(), status, query.limit()).await?,
    ))
}
