//! HTTP server implementation

use std::sync::Arc;

use tower_http::compression::CompressionLayer;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::AppState;
use crate::api::routes;
use crate::backends::EmbeddingClient;
use crate::backends::LlmClient;
use crate::backends::PgVectorSearcher;
use crate::backends::RerankClient;
use crate::backends::StructuredBackend;
use crate::config::AppConfig;
use crate::database::Database;
use crate::history::ConversationStore;
use crate::history::InMemoryConversationStore;
use crate::rag::RagPipeline;
use crate::Result;

/// Start the API server.
///
/// Composition root: every backend client is created once here and shared
/// for the lifetime of the process.
pub async fn serve_api(config: &AppConfig, host: &str, port: u16, enable_cors: bool) -> Result<()> {
    info!("Starting VitaRAG API server...");

    let database = Arc::new(Database::from_config(config).await?);
    database.migrate(config.embedding_dimension()).await?;

    let embeddings = Arc::new(EmbeddingClient::new(&config.embeddings)?);
    let generator = Arc::new(LlmClient::new(&config.llm)?);
    let ranker = Arc::new(RerankClient::new(&config.rerank)?);
    let searcher = Arc::new(PgVectorSearcher::new(
        Arc::clone(&database),
        Arc::clone(&embeddings),
    ));
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new(
        config.limits.history_retention_turns,
    ));
    let structured_backend: Arc<dyn StructuredBackend> = database.clone();

    let pipeline = Arc::new(RagPipeline::new(
        config,
        generator,
        searcher,
        ranker,
        structured_backend,
        Arc::clone(&store),
    ));

    let state = AppState {
        pipeline,
        database,
        embeddings,
        store,
    };

    let mut app = routes::api_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    if enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let addr = format!("{host}:{port}");
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
