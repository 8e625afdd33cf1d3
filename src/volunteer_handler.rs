// src/volunteer_handler.rs
// Public volunteer sign-up.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::donation::is_valid_email;
use crate::error::AppError;
use crate::notifications::{self, AdminNotification, NotificationKind};
use crate::store::{from_row, from_rows, to_row, Database, Query, StoreError};
use crate::AppState;

pub const VOLUNTEERS: &str = "volunteers";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolunteerStatus {
    #[default]
    New,
    Contacted,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: VolunteerStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolunteerSignup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl VolunteerSignup {
    pub fn into_volunteer(self) -> Result<Volunteer, AppError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        let email = self.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }
        let interests: Vec<String> = self
            .interests
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        if interests.is_empty() {
            return Err(AppError::Validation(
                "Choose at least one area of interest".to_string(),
            ));
        }

        Ok(Volunteer {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            email,
            phone: trimmed(self.phone),
            interests,
            availability: trimmed(self.availability),
            message: trimmed(self.message),
            status: VolunteerStatus::New,
            created_at: Utc::now(),
        })
    }
}

pub async fn list_volunteers(
    db: &dyn Database,
    status: Option<VolunteerStatus>,
    limit: usize,
) -> Result<Vec<Volunteer>, StoreError> {
    let mut query = Query::table(VOLUNTEERS).order("created_at", false).limit(limit);
    if let Some(status) = status {
        query = query.eq("status", serde_json::to_value(status)?);
    }
    from_rows(db.select(query).await?)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/volunteers", post(sign_up))
}

async fn sign_up(
    State(state): State<AppState>,
    Json(signup): Json<VolunteerSignup>,
) -> Result<(StatusCode, Json<Volunteer>), AppError> {
    let volunteer = signup.into_volunteer()?;
    let db = state
        .db
        .preferred()
        .ok_or_else(|| AppError::Config("Database is not configured".to_string()))?;

    let stored: Volunteer = from_row(db.insert(VOLUNTEERS, to_row(&volunteer)?).await?)?;
    tracing::info!("[VOLUNTEER] New sign-up {}", stored.id);

    notifications::notify(
        db.as_ref(),
        AdminNotification::new(
            NotificationKind::Info,
            "volunteer",
            "New volunteer sign-up",
            format!("{} wants to help with {}", stored.name, stored.interests.join(", ")),
        )
        .with_metadata(json!({ "volunteerId": stored.id, "email": stored.email })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(stored)))
}
