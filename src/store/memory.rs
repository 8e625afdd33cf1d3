// src/store/memory.rs
// Process-local database used when Supabase is not configured and in tests.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Database, Filter, Query, Row, StoreError};

#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table`.
    pub async fn count(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map(Vec::len).unwrap_or(0)
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn is_null(v: Option<&Value>) -> bool {
    matches!(v, None | Some(Value::Null))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn select(&self, query: Query) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((column, ascending)) = &query.order_by {
            // Nulls last in both directions, matching the PostgREST client.
            rows.sort_by(|a, b| {
                let (a, b) = (a.get(column), b.get(column));
                match (is_null(a), is_null(b)) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) if *ascending => compare_values(a, b),
                    (false, false) => compare_values(a, b).reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        if !matches!(row.get("id"), Some(Value::String(_)) | Some(Value::Number(_))) {
            row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches_all(row, filters)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut deleted = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            let (gone, kept): (Vec<Row>, Vec<Row>) =
                rows.drain(..).partition(|row| matches_all(row, filters));
            *rows = kept;
            deleted = gone;
        }
        Ok(deleted)
    }
}
