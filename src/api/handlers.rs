//! API handlers

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Path;
use axum::extract::State;
use axum::http::header;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use futures::StreamExt;
use tracing::error;
use tracing::info;

use crate::api::types::AddKnowledgeRequest;
use crate::api::types::AddKnowledgeResponse;
use crate::api::types::ApiResponse;
use crate::api::types::ChatRequest;
use crate::api::types::ClassifyRequest;
use crate::api::types::ClassifyResponse;
use crate::api::types::HealthResponse;
use crate::api::types::HistoryResponse;
use crate::backends::EmbeddingClient;
use crate::database::Database;
use crate::database::KnowledgeStats;
use crate::errors::VitaRagError;
use crate::history::ConversationStore;
use crate::models::AnswerChunk;
use crate::models::ChatQuestion;
use crate::rag::RagPipeline;

/// Marker preceding the terminal metadata record in the chat stream
const METADATA_MARKER: &str = "__METADATA__";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub database: Arc<Database>,
    pub embeddings: Arc<EmbeddingClient>,
    pub store: Arc<dyn ConversationStore>,
}

/// Health check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Answer a question as a plain-text token stream.
///
/// The answer tokens are followed by a `__METADATA__{json}` trailer with
/// the final intent, source count and stage timings.
pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    info!("POST /chat: {}", req.question);

    let question = ChatQuestion {
        text: req.question,
        session_id: req.session_id,
        category: req.category,
    };

    match state.pipeline.answer(question).await {
        Ok(stream) => {
            let body = Body::from_stream(stream.map(|item| {
                item.map(|chunk| match chunk {
                    AnswerChunk::Token(token) => token,
                    AnswerChunk::Done(metadata) => {
                        let json = serde_json::to_string(&metadata).unwrap_or_default();
                        format!("{METADATA_MARKER}{json}")
                    }
                })
            }));

            Response::builder()
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(VitaRagError::RateLimited(session)) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::<()>::error(format!(
                "Request quota exhausted for session {session}"
            ))),
        )
            .into_response(),
        Err(e) => {
            error!("Chat pipeline error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// Classify a question without answering it (debugging aid)
pub async fn classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<ApiResponse<ClassifyResponse>>, StatusCode> {
    match state.pipeline.classify_only(&req.question).await {
        Ok(intent) => Ok(Json(ApiResponse::success(ClassifyResponse {
            intent: intent.to_string(),
        }))),
        Err(e) => {
            error!("Classification error: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Fetch a session's retained history
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<HistoryResponse> {
    let history = state.store.history(&session_id).await;
    let count = history.len();
    Json(HistoryResponse {
        session_id,
        history,
        count,
    })
}

/// Clear a session's history
pub async fn clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse<String>> {
    state.store.clear(&session_id).await;
    info!("History cleared for session {session_id}");
    Json(ApiResponse::success(format!(
        "History cleared for {session_id}"
    )))
}

/// Ingest documents into both the vector index and the facts table
pub async fn add_knowledge(
    State(state): State<AppState>,
    Json(req): Json<AddKnowledgeRequest>,
) -> Result<Json<ApiResponse<AddKnowledgeResponse>>, StatusCode> {
    info!("POST /knowledge: {} entries", req.entries.len());

    let mut added = 0;
    for entry in &req.entries {
        let embedding = match state.embeddings.generate(&entry.text_body).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!("Embedding failed during ingestion: {e}");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        if let Err(e) = state.database.insert_document(entry, embedding).await {
            error!("Insert failed during ingestion: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        added += 1;
    }

    Ok(Json(ApiResponse::success(AddKnowledgeResponse { added })))
}

/// Document counts grouped by category
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<KnowledgeStats>>, StatusCode> {
    match state.database.stats().await {
        Ok(stats) => Ok(Json(ApiResponse::success(stats))),
        Err(e) => {
            error!("Stats query failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
