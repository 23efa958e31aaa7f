//! API request and response types

use serde::Deserialize;
use serde::Serialize;

use crate::models::ChatTurn;
use crate::models::KnowledgeEntry;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Chat request
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Classification-only request
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub question: String,
}

/// Classification-only response
#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub intent: String,
}

/// Session history response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: Vec<ChatTurn>,
    pub count: usize,
}

/// Knowledge ingestion request
#[derive(Debug, Deserialize)]
pub struct AddKnowledgeRequest {
    pub entries: Vec<KnowledgeEntry>,
}

/// Knowledge ingestion response
#[derive(Debug, Serialize)]
pub struct AddKnowledgeResponse {
    pub added: usize,
}
