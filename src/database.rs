//! Database access: knowledge embeddings, profile facts, and constrained
//! read-only query execution

use std::collections::HashMap;

use pgvector::Vector;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::Column;
use sqlx::PgPool;
use sqlx::Row;
use tracing::warn;

use crate::backends::StructuredBackend;
use crate::models::KnowledgeEntry;
use crate::models::QueryOutcome;
use crate::models::RetrievedDocument;
use crate::Result;

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    row_cap: usize,
}

#[derive(sqlx::FromRow)]
struct FactRow {
    text_body: String,
    category: Option<String>,
    structured_metadata: serde_json::Value,
    similarity: f64,
}

/// Document counts for the stats endpoint
#[derive(Debug, Serialize)]
pub struct KnowledgeStats {
    pub total: i64,
    pub by_category: HashMap<String, i64>,
}

impl Database {
    pub fn new(pool: PgPool, row_cap: usize) -> Self {
        Self { pool, row_cap }
    }

    /// Create a new database instance from configuration
    pub async fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        let pool_options = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.min_connections())
            .acquire_timeout(std::time::Duration::from_secs(config.connection_timeout()));

        let pool = pool_options.connect(config.database_url()).await?;
        Ok(Self::new(pool, config.retrieval.structured_max_rows))
    }

    /// Create the knowledge tables if they do not exist yet
    pub async fn migrate(&self, embedding_dimension: usize) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS profile_facts (
                id BIGSERIAL PRIMARY KEY,
                text_body TEXT NOT NULL,
                category VARCHAR(100),
                structured_metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_profile_facts_category ON profile_facts (category)")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r"
            CREATE TABLE IF NOT EXISTS knowledge_embeddings (
                id BIGSERIAL PRIMARY KEY,
                text_body TEXT NOT NULL,
                category VARCHAR(100),
                structured_metadata JSONB NOT NULL DEFAULT '{{}}',
                embedding vector({embedding_dimension}),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a reference to the database pool for raw queries
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    /// Nearest-neighbor scan over the knowledge embeddings
    pub async fn search_documents(
        &self,
        query_embedding: Vec<f32>,
        limit: i64,
        category: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>> {
        let embedding = Vector::from(query_embedding);

        let rows: Vec<FactRow> = if let Some(category) = category {
            sqlx::query_as(
                r"
                SELECT text_body, category, structured_metadata,
                       1 - (embedding <=> $1) AS similarity
                FROM knowledge_embeddings
                WHERE embedding IS NOT NULL AND category = $2
                ORDER BY embedding <=> $1
                LIMIT $3
                ",
            )
            .bind(&embedding)
            .bind(category)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r"
                SELECT text_body, category, structured_metadata,
                       1 - (embedding <=> $1) AS similarity
                FROM knowledge_embeddings
                WHERE embedding IS NOT NULL
                ORDER BY embedding <=> $1
                LIMIT $2
                ",
            )
            .bind(&embedding)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        let documents = rows
            .into_iter()
            .enumerate()
            .map(|(rank, row)| {
                // Surface the recall similarity alongside any stored metadata
                let mut metadata = match row.structured_metadata {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                metadata.insert(
                    "similarity".to_string(),
                    serde_json::json!(row.similarity),
                );

                RetrievedDocument {
                    text: row.text_body,
                    category: row.category.unwrap_or_else(|| "general".to_string()),
                    metadata: serde_json::Value::Object(metadata),
                    relevance_score: None,
                    source_rank: rank,
                }
            })
            .collect();

        Ok(documents)
    }

    /// Store a document in both the vector index and the facts table
    pub async fn insert_document(
        &self,
        entry: &KnowledgeEntry,
        embedding: Vec<f32>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO profile_facts (text_body, category, structured_metadata)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(&entry.text_body)
        .bind(&entry.category)
        .bind(&entry.metadata)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO knowledge_embeddings (text_body, category, structured_metadata, embedding)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&entry.text_body)
        .bind(&entry.category)
        .bind(&entry.metadata)
        .bind(Vector::from(embedding))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Document counts grouped by category
    pub async fn stats(&self) -> Result<KnowledgeStats> {
        let counts: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM knowledge_embeddings GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_category = HashMap::new();
        let mut total = 0;
        for (category, count) in counts {
            total += count;
            by_category.insert(category.unwrap_or_else(|| "general".to_string()), count);
        }

        Ok(KnowledgeStats { total, by_category })
    }
}

/// Render one column of a result row as display text.
///
/// Generated queries may project any allow-listed column or aggregate, so
/// the concrete type of each cell is only known at runtime.
fn render_value(row: &PgRow, idx: usize) -> String {
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return value.unwrap_or_else(|| "NULL".to_string());
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_rfc3339());
    }
    "?".to_string()
}

#[async_trait::async_trait]
impl StructuredBackend for Database {
    /// Execute an already validated read-only query and render the rows.
    ///
    /// Execution failures are reported through the error-marker convention
    /// rather than as errors: a malformed generated query is an expected
    /// outcome, not an infrastructure fault.
    async fn execute_readonly(&self, sql: &str) -> Result<String> {
        let rows = match sqlx::query(sql).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Structured query failed: {e}");
                return Ok(format!("{}: {e}", QueryOutcome::ERROR_MARKER));
            }
        };

        if rows.is_empty() {
            return Ok("No matching rows.".to_string());
        }

        let mut out = String::new();
        for row in rows.iter().take(self.row_cap) {
            let cells: Vec<String> = row
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| format!("{}: {}", col.name(), render_value(row, idx)))
                .collect();
            out.push_str(&cells.join(", "));
            out.push('\n');
        }

        Ok(out.trim_end().to_string())
    }
}
