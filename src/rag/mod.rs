//! RAG (Retrieval-Augmented Generation) pipeline
//!
//! End-to-end intent-routed question answering over a professional profile:
//! - Question normalization and history-aware reformulation
//! - Intent classification into structured / semantic / hybrid / off-topic
//! - Structured query execution with read-only guarding
//! - Two-stage semantic retrieval (recall, then reranked precision)
//! - Context assembly with provenance counts
//! - Streamed answer generation with retry and fallback handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use vitarag::backends::{EmbeddingClient, LlmClient, PgVectorSearcher, RerankClient};
//! use vitarag::config::AppConfig;
//! use vitarag::database::Database;
//! use vitarag::history::InMemoryConversationStore;
//! use vitarag::models::ChatQuestion;
//! use vitarag::rag::RagPipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let database = Arc::new(Database::from_config(&config).await?);
//!     let embeddings = Arc::new(EmbeddingClient::new(&config.embeddings)?);
//!     let generator = Arc::new(LlmClient::new(&config.llm)?);
//!     let ranker = Arc::new(RerankClient::new(&config.rerank)?);
//!     let searcher = Arc::new(PgVectorSearcher::new(database.clone(), embeddings));
//!     let store = Arc::new(InMemoryConversationStore::new(
//!         config.limits.history_retention_turns,
//!     ));
//!
//!     let pipeline = RagPipeline::new(&config, generator, searcher, ranker, database, store);
//!
//!     let stream = pipeline
//!         .answer(ChatQuestion::new("How many projects have you built?"))
//!         .await?;
//!     let (answer, metadata) = stream.collect().await?;
//!     println!("Answer: {answer}");
//!     if let Some(metadata) = metadata {
//!         println!("Intent: {} ({} sources)", metadata.intent, metadata.sources_count);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod context;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod rephrase;
pub mod retriever;
pub mod structured;

pub use classify::IntentClassifier;
pub use context::AssembledContext;
pub use context::ContextAssembler;
pub use normalize::QuestionNormalizer;
pub use pipeline::AnswerStream;
pub use pipeline::RagPipeline;
pub use rephrase::QuestionRephraser;
pub use retriever::SemanticRetriever;
pub use structured::StructuredQueryExecutor;
