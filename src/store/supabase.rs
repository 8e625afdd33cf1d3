// src/store/supabase.rs
// PostgREST client for a hosted Supabase project.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use super::{Database, Filter, Query, Row, StoreError};

#[derive(Clone)]
pub struct SupabaseClient {
    http_client: Client,
    rest_url: String,
    api_key: String,
}

impl SupabaseClient {
    /// `api_key` is either the anon key or the service-role key; the latter
    /// bypasses row level security.
    pub fn new(http_client: Client, project_url: &str, api_key: &str) -> Self {
        Self {
            http_client,
            rest_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows(resp: Response) -> Result<Vec<Row>, StoreError> {
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = resp.json().await?;
        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    _ => Err(StoreError::NotAnObject),
                })
                .collect(),
            Value::Object(map) => Ok(vec![map]),
            _ => Err(StoreError::NotAnObject),
        }
    }
}

/// `col=eq.value` pairs as PostgREST expects them.
fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| {
            let value = match &f.value {
                Value::String(s) => s.clone(),
                Value::Null => "null".to_string(),
                other => other.to_string(),
            };
            let op = if f.value.is_null() { "is" } else { "eq" };
            (f.column.clone(), format!("{}.{}", op, value))
        })
        .collect()
}

#[async_trait]
impl Database for SupabaseClient {
    async fn select(&self, query: Query) -> Result<Vec<Row>, StoreError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(&query.filters));
        if let Some((column, ascending)) = &query.order_by {
            let dir = if *ascending { "asc.nullslast" } else { "desc.nullslast" };
            params.push(("order".to_string(), format!("{}.{}", column, dir)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let resp = self
            .authorized(self.http_client.get(self.table_url(&query.table)))
            .query(&params)
            .send()
            .await?;
        Self::rows(resp).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let resp = self
            .authorized(self.http_client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        Self::rows(resp)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotAnObject)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let resp = self
            .authorized(self.http_client.patch(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .json(&patch)
            .send()
            .await?;
        Self::rows(resp).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let resp = self
            .authorized(self.http_client.delete(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .send()
            .await?;
        Self::rows(resp).await
    }
}
