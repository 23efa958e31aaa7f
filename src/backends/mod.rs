//! Backend capability interfaces and their HTTP client implementations
//!
//! Every long-latency external dependency of the pipeline (text generation,
//! embedding search, reranking, structured query execution) sits behind one
//! of these traits. The composition root builds the concrete clients once
//! and hands them to the pipeline as `Arc<dyn ...>`; tests substitute mocks.

pub mod embedding;
pub mod generation;
pub mod rerank;
pub mod vector;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use embedding::EmbeddingClient;
pub use generation::LlmClient;
pub use rerank::RerankClient;
pub use vector::PgVectorSearcher;

use crate::errors::Result;
use crate::models::RerankHit;
use crate::models::RetrievedDocument;

/// A finite, non-restartable sequence of generated text chunks
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Text generation capability of a language-model backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a complete response for a prompt
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;

    /// Generate a response as a lazily consumed token stream
    async fn stream_generate(&self, prompt: &str) -> Result<TokenStream>;
}

/// Approximate nearest-neighbor search over the embedding index
#[async_trait]
pub trait DocumentSearcher: Send + Sync {
    /// Top-k candidates for a query, optionally filtered by category
    async fn search(
        &self,
        query: &str,
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// Cross-encoder precision ranking over a candidate set
#[async_trait]
pub trait RelevanceRanker: Send + Sync {
    /// Relevance-ordered top-k subset of `documents`, with scores and the
    /// index of each hit in the input slice
    async fn rerank(&self, query: &str, documents: &[String], top_k: usize)
        -> Result<Vec<RerankHit>>;
}

/// Read-only query execution against the structured store.
///
/// Results use a string-marker convention: a leading `ERROR` token signals
/// failure, anything else is a success. Callers normalize into
/// [`crate::models::QueryOutcome`] immediately.
#[async_trait]
pub trait StructuredBackend: Send + Sync {
    async fn execute_readonly(&self, sql: &str) -> Result<String>;
}
