use thiserror::Error;

#[derive(Error, Debug)]
pub enum VitaRagError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Generation backend error: {0}")]
    Generation(String),

    #[error("Embedding backend error: {0}")]
    Embedding(String),

    #[error("Rerank backend error: {0}")]
    Rerank(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Backend call timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded for session: {0}")]
    RateLimited(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VitaRagError>;
