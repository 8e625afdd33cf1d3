// src/store.rs
// Table-oriented database access shaped after Supabase's PostgREST client.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod memory;
pub mod supabase;

pub use memory::MemoryDatabase;
pub use supabase::SupabaseClient;

pub type Row = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Database row could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Row is not a JSON object")]
    NotAnObject,
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order_by = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn select(&self, query: Query) -> Result<Vec<Row>, StoreError>;

    /// Inserts one row and returns it as stored (ids and defaults filled in).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Patches every row matching all filters and returns the updated rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Row)
        -> Result<Vec<Row>, StoreError>;

    /// Deletes every row matching all filters and returns the deleted rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError>;
}

/// Elevated and anonymous database handles. Handlers ask for `preferred()`
/// and never look at the environment themselves.
#[derive(Clone, Default)]
pub struct DbClients {
    pub admin: Option<Arc<dyn Database>>,
    pub anon: Option<Arc<dyn Database>>,
}

impl DbClients {
    pub fn new(admin: Option<Arc<dyn Database>>, anon: Option<Arc<dyn Database>>) -> Self {
        Self { admin, anon }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Single backing database used for both roles (tests, local dev).
    pub fn shared(db: Arc<dyn Database>) -> Self {
        Self {
            admin: Some(db.clone()),
            anon: Some(db),
        }
    }

    pub fn preferred(&self) -> Option<Arc<dyn Database>> {
        self.admin.clone().or_else(|| self.anon.clone())
    }

    pub fn has_admin(&self) -> bool {
        self.admin.is_some()
    }
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(from_row).collect()
}
