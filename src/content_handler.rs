// src/content_handler.rs
// GET/POST/PUT/DELETE for every content type over the shared `content` table.

use axum::{
    extract::{Query as QueryParams, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::auth::RequireModerator;
use crate::content::{
    slugify, to_view, ContentDetails, ContentItem, ContentStatus, ContentType, CONTENT,
};
use crate::error::AppError;
use crate::store::{from_row, from_rows, to_row, Database, Filter, Query};
use crate::AppState;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize, Default)]
pub struct ContentQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<ContentStatus>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

/// Fields accepted on create and update; absent fields are left alone.
#[derive(Debug, Deserialize, Default)]
pub struct ContentInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: Option<ContentStatus>,
    #[serde(default, alias = "publishDate")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub details: Option<Value>,
}

pub fn router() -> Router<AppState> {
    ContentType::ALL.into_iter().fold(Router::new(), |router, kind| {
        let path = format!("/api/{}", kind.route_segment());
        router.route(
            &path,
            get(
                move |State(state): State<AppState>, QueryParams(query): QueryParams<ContentQuery>| async move {
                    list_content(&state, kind, query).await
                },
            )
            .post(
                move |State(state): State<AppState>,
                      RequireModerator(user): RequireModerator,
                      Json(input): Json<ContentInput>| async move {
                    tracing::info!("[CONTENT] {} creating {}", user.email_or_id(), kind);
                    let created = create_content(&state, kind, input).await?;
                    Ok::<_, AppError>((StatusCode::CREATED, Json(created)))
                },
            )
            .put(
                move |State(state): State<AppState>,
                      RequireModerator(user): RequireModerator,
                      QueryParams(IdQuery { id }): QueryParams<IdQuery>,
                      Json(input): Json<ContentInput>| async move {
                    tracing::info!("[CONTENT] {} updating {} {}", user.email_or_id(), kind, id);
                    update_content(&state, kind, &id, input).await.map(Json)
                },
            )
            .delete(
                move |State(state): State<AppState>,
                      RequireModerator(user): RequireModerator,
                      QueryParams(IdQuery { id }): QueryParams<IdQuery>| async move {
                    tracing::info!("[CONTENT] {} deleting {} {}", user.email_or_id(), kind, id);
                    delete_content(&state, kind, &id).await.map(Json)
                },
            ),
        )
    })
}

fn writable_db(state: &AppState) -> Result<Arc<dyn Database>, AppError> {
    state
        .db
        .preferred()
        .ok_or_else(|| AppError::Config("Database is not configured".to_string()))
}

fn scoped(kind: ContentType, id: &str) -> [Filter; 2] {
    [Filter::eq("id", id), Filter::eq("type", kind.as_str())]
}

fn parse_details(kind: ContentType, raw: &Value) -> Result<Value, AppError> {
    ContentDetails::parse(kind, raw)
        .map(|details| details.to_value())
        .map_err(|e| AppError::Validation(format!("Invalid {} details: {}", kind, e)))
}

/// Lists one content type; a missing database reads as empty.
pub async fn list_content(
    state: &AppState,
    kind: ContentType,
    query: ContentQuery,
) -> Result<Json<Value>, AppError> {
    let Some(db) = state.db.preferred() else {
        tracing::warn!("[CONTENT] No database; serving empty {} list", kind);
        return Ok(Json(json!([])));
    };

    let mut select = Query::table(CONTENT).eq("type", kind.as_str());

    if let Some(id) = query.id {
        select = select.eq("id", id.as_str()).limit(1);
        let item: ContentItem = from_rows(db.select(select).await?)?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("No {} with id {}", kind, id)))?;
        return Ok(Json(to_view(&item)));
    }

    if let Some(status) = query.status {
        select = select.eq("status", serde_json::to_value(status)?);
    }
    if let Some(featured) = query.featured {
        select = select.eq("featured", featured);
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    select = select.order("publish_date", false).limit(limit);

    let views = db
        .select(select)
        .await?
        .into_iter()
        .filter_map(|row| match from_row::<ContentItem>(row) {
            Ok(item) => Some(to_view(&item)),
            Err(e) => {
                tracing::warn!("[CONTENT] Skipping undecodable {} row: {}", kind, e);
                None
            }
        })
        .collect();
    Ok(Json(Value::Array(views)))
}

pub async fn create_content(
    state: &AppState,
    kind: ContentType,
    input: ContentInput,
) -> Result<Value, AppError> {
    let db = writable_db(state)?;

    let title = input
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("Title is required".to_string()))?
        .to_string();
    let slug = slugify(&title);
    if slug.is_empty() {
        return Err(AppError::Validation(
            "Title must contain letters or digits".to_string(),
        ));
    }

    let status = input.status.unwrap_or_default();
    let publish_date = match (input.publish_date, status) {
        (Some(date), _) => Some(date),
        (None, ContentStatus::Published) => Some(Utc::now()),
        (None, _) => None,
    };
    let now = Utc::now();
    let item = ContentItem {
        id: uuid::Uuid::new_v4().to_string(),
        kind,
        title,
        slug,
        excerpt: input.excerpt,
        content: input.content,
        image_url: input.image_url,
        author: input.author,
        status,
        publish_date,
        featured: input.featured.unwrap_or(false),
        tags: input.tags.unwrap_or_default(),
        details: parse_details(kind, input.details.as_ref().unwrap_or(&Value::Null))?,
        created_at: now,
        updated_at: now,
    };

    let stored: ContentItem = from_row(db.insert(CONTENT, to_row(&item)?).await?)?;
    tracing::info!("[CONTENT] Created {} '{}' ({})", kind, stored.title, stored.id);
    Ok(to_view(&stored))
}

pub async fn update_content(
    state: &AppState,
    kind: ContentType,
    id: &str,
    input: ContentInput,
) -> Result<Value, AppError> {
    let db = writable_db(state)?;
    let filters = scoped(kind, id);

    let existing: ContentItem = from_rows(
        db.select(Query::table(CONTENT).eq("id", id).eq("type", kind.as_str()).limit(1))
            .await?,
    )?
    .into_iter()
    .next()
    .ok_or_else(|| AppError::NotFound(format!("No {} with id {}", kind, id)))?;

    let mut patch = Map::new();
    if let Some(title) = input.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        if title != existing.title {
            let slug = slugify(title);
            if slug.is_empty() {
                return Err(AppError::Validation(
                    "Title must contain letters or digits".to_string(),
                ));
            }
            patch.insert("title".into(), json!(title));
            patch.insert("slug".into(), json!(slug));
        }
    }
    if let Some(excerpt) = input.excerpt {
        patch.insert("excerpt".into(), json!(excerpt));
    }
    if let Some(content) = input.content {
        patch.insert("content".into(), json!(content));
    }
    if let Some(image_url) = input.image_url {
        patch.insert("image_url".into(), json!(image_url));
    }
    if let Some(author) = input.author {
        patch.insert("author".into(), json!(author));
    }
    if let Some(featured) = input.featured {
        patch.insert("featured".into(), json!(featured));
    }
    if let Some(tags) = input.tags {
        patch.insert("tags".into(), json!(tags));
    }
    if let Some(details) = input.details.as_ref() {
        patch.insert("details".into(), parse_details(kind, details)?);
    }
    if let Some(status) = input.status {
        patch.insert("status".into(), json!(status));
    }
    match input.publish_date {
        Some(date) => {
            patch.insert("publish_date".into(), json!(date));
        }
        None if input.status == Some(ContentStatus::Published)
            && existing.publish_date.is_none() =>
        {
            patch.insert("publish_date".into(), json!(Utc::now()));
        }
        None => {}
    }
    patch.insert("updated_at".into(), json!(Utc::now()));

    let updated: ContentItem = from_rows(db.update(CONTENT, &filters, patch).await?)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("No {} with id {}", kind, id)))?;
    Ok(to_view(&updated))
}

/// Hard delete, scoped to `kind` so a same-id row of another type survives.
pub async fn delete_content(state: &AppState, kind: ContentType, id: &str) -> Result<Value, AppError> {
    let db = writable_db(state)?;
    let deleted = db.delete(CONTENT, &scoped(kind, id)).await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound(format!("No {} with id {}", kind, id)));
    }
    tracing::info!("[CONTENT] Deleted {} {}", kind, id);
    Ok(json!({ "success": true, "id": id }))
}
