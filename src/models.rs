//! Core data types shared across the pipeline

use std::fmt;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

/// A question as received from the caller
#[derive(Debug, Clone, Deserialize)]
pub struct ChatQuestion {
    pub text: String,
    pub session_id: Option<String>,
    pub category: Option<String>,
}

impl ChatQuestion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Handling strategy for a classified question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Precise counts, enumerations, dates, narrow filters
    Structured,
    /// Open-ended, descriptive, or personality questions
    Semantic,
    /// Identify a specific record, then elaborate on it
    Hybrid,
    /// No plausible connection to the subject's professional profile
    OffTopic,
    /// Classifier output that did not match any known label
    Unknown,
}

impl Intent {
    /// Parse a raw classifier output into an intent label.
    ///
    /// Tolerates surrounding whitespace, casing, and a trailing period;
    /// anything else maps to `Unknown` (the orchestrator decides what to
    /// do with that, not the classifier).
    pub fn parse_label(raw: &str) -> Self {
        let label = raw.trim().trim_end_matches('.').to_uppercase();
        match label.as_str() {
            "STRUCTURED" => Self::Structured,
            "SEMANTIC" => Self::Semantic,
            "HYBRID" => Self::Hybrid,
            "OFF_TOPIC" => Self::OffTopic,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Structured => "STRUCTURED",
            Self::Semantic => "SEMANTIC",
            Self::Hybrid => "HYBRID",
            Self::OffTopic => "OFF_TOPIC",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{label}")
    }
}

/// A document returned by the semantic retrieval path
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub text: String,
    pub category: String,
    pub metadata: serde_json::Value,
    /// Set by the precision stage only; recall candidates carry `None`
    pub relevance_score: Option<f32>,
    /// Position in the original recall candidate list
    pub source_rank: usize,
}

/// One hit from the reranking backend, pointing back into the candidate list
#[derive(Debug, Clone, Copy)]
pub struct RerankHit {
    pub index: usize,
    pub score: f32,
}

/// Outcome of the structured query path.
///
/// The structured backend speaks a string-marker convention (a leading
/// `ERROR` token signals failure); it is normalized into this tagged type
/// at the boundary so downstream logic branches on type, not on string
/// matching. Any result without the marker, including an empty one, is a
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Success(String),
    Failure(String),
}

impl QueryOutcome {
    /// Error marker prefix used by the structured backend
    pub const ERROR_MARKER: &'static str = "ERROR";

    /// Normalize a raw backend result string into a tagged outcome
    pub fn from_backend(raw: String) -> Self {
        if raw.trim_start().starts_with(Self::ERROR_MARKER) {
            Self::Failure(raw)
        } else {
            Self::Success(raw)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// A document to ingest into both the vector index and the facts table
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeEntry {
    pub text_body: String,
    pub category: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Per-request record of stage timings, kept purely for observability
#[derive(Debug)]
pub struct PipelineTrace {
    request_id: String,
    started: Instant,
    stages: Vec<StageTiming>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

impl PipelineTrace {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            started: Instant::now(),
            stages: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Record the elapsed wall-clock time of one stage
    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        self.stages.push(StageTiming {
            stage: stage.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    pub fn stages(&self) -> &[StageTiming] {
        &self.stages
    }

    /// Snapshot the trace for the terminal metadata record
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            request_id: self.request_id.clone(),
            total_ms: self.started.elapsed().as_millis() as u64,
            stages: self.stages.clone(),
        }
    }
}

/// Serializable snapshot of a `PipelineTrace`
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub request_id: String,
    pub total_ms: u64,
    pub stages: Vec<StageTiming>,
}

/// Terminal metadata record emitted after the last answer token
#[derive(Debug, Clone, Serialize)]
pub struct AnswerMetadata {
    /// Strategy that actually produced the context used for generation,
    /// e.g. `"STRUCTURED"` or the composite `"STRUCTURED→SEMANTIC"`
    pub intent: String,
    pub sources_count: usize,
    pub timings: TraceSummary,
}

/// One item of the answer stream
#[derive(Debug, Clone)]
pub enum AnswerChunk {
    Token(String),
    Done(AnswerMetadata),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse_exact_labels() {
        assert_eq!(Intent::parse_label("STRUCTURED"), Intent::Structured);
        assert_eq!(Intent::parse_label("SEMANTIC"), Intent::Semantic);
        assert_eq!(Intent::parse_label("HYBRID"), Intent::Hybrid);
        assert_eq!(Intent::parse_label("OFF_TOPIC"), Intent::OffTopic);
    }

    #[test]
    fn test_intent_parse_tolerates_noise() {
        assert_eq!(Intent::parse_label("  semantic \n"), Intent::Semantic);
        assert_eq!(Intent::parse_label("Structured."), Intent::Structured);
    }

    #[test]
    fn test_intent_parse_unknown_on_chatter() {
        assert_eq!(
            Intent::parse_label("I think this is SEMANTIC"),
            Intent::Unknown
        );
        assert_eq!(Intent::parse_label(""), Intent::Unknown);
    }

    #[test]
    fn test_intent_display_round_trips() {
        for intent in [
            Intent::Structured,
            Intent::Semantic,
            Intent::Hybrid,
            Intent::OffTopic,
        ] {
            assert_eq!(Intent::parse_label(&intent.to_string()), intent);
        }
    }

    #[test]
    fn test_query_outcome_marker() {
        assert!(QueryOutcome::from_backend("3 rows".to_string()).is_success());
        assert!(QueryOutcome::from_backend(String::new()).is_success());
        assert!(!QueryOutcome::from_backend("ERROR: relation missing".to_string()).is_success());
        // Marker must lead; a result merely mentioning errors is a success
        assert!(QueryOutcome::from_backend("0 ERROR rows".to_string()).is_success());
    }

    #[test]
    fn test_trace_records_stage_order() {
        let mut trace = PipelineTrace::new("REQ-1");
        trace.record("CLASSIFY", Duration::from_millis(12));
        trace.record("GENERATE", Duration::from_millis(340));

        let summary = trace.summary();
        assert_eq!(summary.stages.len(), 2);
        assert_eq!(summary.stages[0].stage, "CLASSIFY");
        assert_eq!(summary.stages[1].stage, "GENERATE");
    }
}
