//! Vector index searcher backed by pgvector

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backends::DocumentSearcher;
use crate::backends::EmbeddingClient;
use crate::database::Database;
use crate::errors::Result;
use crate::models::RetrievedDocument;

/// Nearest-neighbor search over the knowledge embeddings table.
///
/// Embeds the query text, then delegates the similarity scan to Postgres.
pub struct PgVectorSearcher {
    database: Arc<Database>,
    embeddings: Arc<EmbeddingClient>,
}

impl PgVectorSearcher {
    pub fn new(database: Arc<Database>, embeddings: Arc<EmbeddingClient>) -> Self {
        Self {
            database,
            embeddings,
        }
    }
}

#[async_trait]
impl DocumentSearcher for PgVectorSearcher {
    async fn search(
        &self,
        query: &str,
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>> {
        debug!("Semantic search (k={k}): {query}");

        let query_embedding = self.embeddings.generate(query).await?;
        self.database
            .search_documents(query_embedding, k as i64, category)
            .await
    }
}
