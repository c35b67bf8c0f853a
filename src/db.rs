use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use thiserror::Error;

/// A document as returned by the store: its assigned id plus raw fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// `Last(n)` keeps the final `n` records of the ordering, still returned in
/// that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(usize),
    Last(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Option<(String, Value)>,
    pub order_by: String,
    pub direction: Direction,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn collection(name: &str, order_by: &str) -> Self {
        Self {
            collection: name.to_string(),
            filter: None,
            order_by: order_by.to_string(),
            direction: Direction::Ascending,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter = Some((field.to_string(), value.into()));
        self
    }

    pub fn descending(mut self) -> Self {
        self.direction = Direction::Descending;
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Malformed document {id}: {source}")]
    Document {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported filter value for field '{0}'")]
    UnsupportedFilter(String),
    #[error("Invalid field name '{0}'")]
    InvalidField(String),
}

/// Read side of a remote document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Vec<RawRecord>, StoreError>;
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    collection: String,
    id: String,
    data: Value,
}

/// SQLite-backed document store. Each row is one JSON document in a
/// named collection.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data)
            VALUES (?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                data = excluded.data
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(data.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Import a JSON array of `{collection, id, data}` documents.
    pub async fn import_seed<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let documents: Vec<SeedDocument> = serde_json::from_str(&content)?;

        for doc in &documents {
            self.upsert_document(&doc.collection, &doc.id, &doc.data)
                .await?;
        }

        Ok(documents.len())
    }

    pub async fn document_count(&self, collection: &str) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

fn json_path(field: &str) -> Result<String, StoreError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidField(field.to_string()));
    }
    Ok(format!("$.{}", field))
}

#[async_trait]
impl DocumentStore for Database {
    async fn query(&self, query: &Query) -> Result<Vec<RawRecord>, StoreError> {
        let order_path = json_path(&query.order_by)?;

        // Limit-to-last runs the ordering backwards and flips the rows after
        let reverse = matches!(query.limit, Some(Limit::Last(_)));
        let descending = (query.direction == Direction::Descending) != reverse;
        let order = if descending { "DESC" } else { "ASC" };

        let mut builder = sqlx::QueryBuilder::<Sqlite>::new(
            "SELECT id, data FROM documents WHERE collection = ",
        );
        builder.push_bind(query.collection.clone());

        if let Some((field, value)) = &query.filter {
            builder.push(" AND json_extract(data, ");
            builder.push_bind(json_path(field)?);
            builder.push(") = ");
            match value {
                Value::Bool(b) => builder.push_bind(*b as i64),
                Value::Number(n) if n.is_i64() => builder.push_bind(n.as_i64().unwrap_or_default()),
                Value::Number(n) => builder.push_bind(n.as_f64().unwrap_or_default()),
                Value::String(s) => builder.push_bind(s.clone()),
                _ => return Err(StoreError::UnsupportedFilter(field.clone())),
            };
        }

        builder.push(" ORDER BY json_extract(data, ");
        builder.push_bind(order_path);
        builder.push(format!(") {order}, rowid {order}"));

        if let Some(Limit::First(n) | Limit::Last(n)) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(n as i64);
        }

        let rows: Vec<(String, String)> = builder.build_query_as().fetch_all(&self.pool).await?;

        let mut records = rows
            .into_iter()
            .map(|(id, data)| match serde_json::from_str::<Value>(&data) {
                Ok(Value::Object(fields)) => Ok(RawRecord { id, fields }),
                Ok(_) => Ok(RawRecord {
                    id,
                    fields: Map::new(),
                }),
                Err(source) => Err(StoreError::Document { id, source }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if reverse {
            records.reverse();
        }

        Ok(records)
    }
}
