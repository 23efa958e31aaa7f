//! Pipeline orchestration: the per-request state machine
//!
//! Sequences normalization, reformulation, classification, retrieval and
//! generation, owns the fallback transitions between retrieval strategies,
//! and times every stage into a [`PipelineTrace`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;
use std::time::Instant;

use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::backends::DocumentSearcher;
use crate::backends::RelevanceRanker;
use crate::backends::StructuredBackend;
use crate::backends::TextGenerator;
use crate::config::AppConfig;
use crate::config::LimitsConfig;
use crate::config::PersonaConfig;
use crate::config::RetrievalConfig;
use crate::errors::Result;
use crate::errors::VitaRagError;
use crate::history::ConversationStore;
use crate::history::SessionRateLimiter;
use crate::models::AnswerChunk;
use crate::models::AnswerMetadata;
use crate::models::ChatQuestion;
use crate::models::Intent;
use crate::models::PipelineTrace;
use crate::models::QueryOutcome;
use crate::rag::classify::IntentClassifier;
use crate::rag::context::ContextAssembler;
use crate::rag::normalize::QuestionNormalizer;
use crate::rag::prompts;
use crate::rag::rephrase::QuestionRephraser;
use crate::rag::retriever::SemanticRetriever;
use crate::rag::structured::StructuredQueryExecutor;

pub const STAGE_RATE_CHECK: &str = "RATE_CHECK";
pub const STAGE_HISTORY_LOAD: &str = "HISTORY_LOAD";
pub const STAGE_NORMALIZE: &str = "NORMALIZE";
pub const STAGE_REPHRASE: &str = "REPHRASE";
pub const STAGE_CLASSIFY: &str = "CLASSIFY";
pub const STAGE_STRUCTURED_EXEC: &str = "STRUCTURED_EXEC";
pub const STAGE_HYBRID_EXEC: &str = "HYBRID_EXEC";
pub const STAGE_SEMANTIC_EXEC: &str = "SEMANTIC_EXEC";
pub const STAGE_OFF_TOPIC_RESPOND: &str = "OFF_TOPIC_RESPOND";
pub const STAGE_GENERATE: &str = "GENERATE";
pub const STAGE_PERSIST: &str = "PERSIST";

/// Lazily consumed answer stream. Finite and non-restartable: once the
/// terminal [`AnswerChunk::Done`] is yielded the stream is exhausted.
pub struct AnswerStream {
    inner: Pin<Box<dyn Stream<Item = Result<AnswerChunk>> + Send>>,
}

impl AnswerStream {
    fn from_receiver(rx: mpsc::Receiver<Result<AnswerChunk>>) -> Self {
        Self {
            inner: Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })),
        }
    }

    fn from_items(items: Vec<Result<AnswerChunk>>) -> Self {
        Self {
            inner: Box::pin(futures::stream::iter(items)),
        }
    }

    /// Drain the stream into the full answer text and terminal metadata
    pub async fn collect(mut self) -> Result<(String, Option<AnswerMetadata>)> {
        let mut answer = String::new();
        let mut metadata = None;
        while let Some(item) = self.inner.next().await {
            match item? {
                AnswerChunk::Token(token) => answer.push_str(&token),
                AnswerChunk::Done(meta) => metadata = Some(meta),
            }
        }
        Ok((answer, metadata))
    }
}

impl Stream for AnswerStream {
    type Item = Result<AnswerChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// The conversational RAG pipeline
pub struct RagPipeline {
    normalizer: QuestionNormalizer,
    rephraser: QuestionRephraser,
    classifier: IntentClassifier,
    structured: StructuredQueryExecutor,
    retriever: SemanticRetriever,
    assembler: ContextAssembler,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ConversationStore>,
    rate_limiter: SessionRateLimiter,
    persona: PersonaConfig,
    retrieval: RetrievalConfig,
    limits: LimitsConfig,
}

impl RagPipeline {
    /// Wire the pipeline from injected capability objects.
    ///
    /// The composition root creates each backend client once and shares it;
    /// tests substitute mocks for any of them.
    pub fn new(
        config: &AppConfig,
        generator: Arc<dyn TextGenerator>,
        searcher: Arc<dyn DocumentSearcher>,
        ranker: Arc<dyn RelevanceRanker>,
        structured_backend: Arc<dyn StructuredBackend>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let retrieval = config.retrieval.clone();
        let limits = config.limits.clone();
        let persona = config.persona.clone();

        Self {
            normalizer: QuestionNormalizer::new(),
            rephraser: QuestionRephraser::new(
                Arc::clone(&generator),
                limits.rephrase_context_turns,
            ),
            classifier: IntentClassifier::new(Arc::clone(&generator), persona.clone()),
            structured: StructuredQueryExecutor::new(
                Arc::clone(&generator),
                structured_backend,
                retrieval.allowed_tables.clone(),
                retrieval.structured_max_rows,
                Duration::from_millis(retrieval.query_timeout_ms),
            ),
            retriever: SemanticRetriever::new(searcher, ranker),
            assembler: ContextAssembler::new(),
            generator,
            store,
            rate_limiter: SessionRateLimiter::new(limits.max_requests_per_session),
            persona,
            retrieval,
            limits,
        }
    }

    /// Classify a question without running the rest of the pipeline
    pub async fn classify_only(&self, question: &str) -> Result<Intent> {
        let normalized = self.normalizer.normalize(question);
        self.classifier.classify(&normalized).await
    }

    /// Answer a question, returning a token stream terminated by a
    /// metadata record.
    ///
    /// # Errors
    /// - `RateLimited` when the session's request quota is exhausted; no
    ///   further stage runs in that case
    pub async fn answer(&self, question: ChatQuestion) -> Result<AnswerStream> {
        let request_id = format!("CHAT-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut trace = PipelineTrace::new(request_id.clone());
        let session_id = question
            .session_id
            .clone()
            .unwrap_or_else(|| "anonymous".to_string());

        info!("[{request_id}] New question for session {session_id}: {}", question.text);

        // RATE_CHECK: over-quota is a user-facing terminal condition
        let started = Instant::now();
        let allowed = self.rate_limiter.check_and_increment(&session_id);
        trace.record(STAGE_RATE_CHECK, started.elapsed());
        if !allowed {
            return Err(VitaRagError::RateLimited(session_id));
        }

        // HISTORY_LOAD
        let started = Instant::now();
        let history = self.store.history(&session_id).await;
        trace.record(STAGE_HISTORY_LOAD, started.elapsed());
        debug!("[{request_id}] Loaded {} history turns", history.len());

        // NORMALIZE
        let started = Instant::now();
        let normalized = self.normalizer.normalize(&question.text);
        trace.record(STAGE_NORMALIZE, started.elapsed());

        // REPHRASE: best-effort, never fails
        let started = Instant::now();
        let standalone = self.rephraser.rephrase(&normalized, &history).await;
        trace.record(STAGE_REPHRASE, started.elapsed());

        // CLASSIFY
        let started = Instant::now();
        let classified = self.classifier.classify(&standalone).await;
        trace.record(STAGE_CLASSIFY, started.elapsed());
        match &classified {
            Ok(intent) => info!("[{request_id}] Intent: {intent}"),
            Err(e) => warn!("[{request_id}] Classification failed: {e}"),
        }

        // OFF_TOPIC short-circuits: fixed redirect, no generation
        if matches!(classified, Ok(Intent::OffTopic)) {
            let started = Instant::now();
            let reply = prompts::pick_off_topic_reply();
            self.store
                .append_exchange(&session_id, &question.text, reply)
                .await;
            trace.record(STAGE_OFF_TOPIC_RESPOND, started.elapsed());

            let metadata = AnswerMetadata {
                intent: Intent::OffTopic.to_string(),
                sources_count: 0,
                timings: trace.summary(),
            };
            return Ok(AnswerStream::from_items(vec![
                Ok(AnswerChunk::Token(reply.to_string())),
                Ok(AnswerChunk::Done(metadata)),
            ]));
        }

        let (context, sources_count, intent_label) = self
            .build_context(
                &request_id,
                classified,
                &standalone,
                question.category.as_deref(),
                &mut trace,
            )
            .await;

        // GENERATE + PERSIST run in the producer task so the caller can
        // consume tokens lazily; a dropped receiver stops generation and
        // the partial answer is still persisted best-effort.
        let history_tail = history[history.len().saturating_sub(4)..].to_vec();
        let prompt = prompts::build_generation_prompt(
            &self.persona,
            &context,
            &prompts::format_history(&history_tail),
            &standalone,
        );

        let (tx, rx) = mpsc::channel::<Result<AnswerChunk>>(32);
        let generator = Arc::clone(&self.generator);
        let store = Arc::clone(&self.store);
        let raw_question = question.text.clone();
        let max_retries = self.limits.generation_max_retries;
        let context_is_empty = context.is_empty();

        tokio::spawn(async move {
            let gen_started = Instant::now();
            let mut answer = String::new();

            let client_connected = if context_is_empty {
                // Total context exhaustion is a content gap, not a defect
                answer.push_str(prompts::INSUFFICIENT_CONTEXT_MESSAGE);
                tx.send(Ok(AnswerChunk::Token(answer.clone()))).await.is_ok()
            } else {
                stream_with_retries(generator.as_ref(), &prompt, max_retries, &tx, &mut answer)
                    .await
            };
            trace.record(STAGE_GENERATE, gen_started.elapsed());

            let persist_started = Instant::now();
            store
                .append_exchange(&session_id, &raw_question, &answer)
                .await;
            trace.record(STAGE_PERSIST, persist_started.elapsed());

            if client_connected {
                let metadata = AnswerMetadata {
                    intent: intent_label,
                    sources_count,
                    timings: trace.summary(),
                };
                let _ = tx.send(Ok(AnswerChunk::Done(metadata))).await;
            } else {
                debug!("[{request_id}] Client disconnected; partial answer persisted");
            }
        });

        Ok(AnswerStream::from_receiver(rx))
    }

    /// Run the retrieval strategy for a classified intent, applying the
    /// fallback transitions. Returns the context, its source count, and the
    /// label of the strategy that actually produced the context.
    async fn build_context(
        &self,
        request_id: &str,
        classified: Result<Intent>,
        standalone: &str,
        category: Option<&str>,
        trace: &mut PipelineTrace,
    ) -> (String, usize, String) {
        match classified {
            Ok(Intent::Structured) => {
                let started = Instant::now();
                let outcome = self.structured.execute(standalone).await;
                trace.record(STAGE_STRUCTURED_EXEC, started.elapsed());

                match outcome {
                    QueryOutcome::Success(result) => (result, 1, Intent::Structured.to_string()),
                    QueryOutcome::Failure(reason) => {
                        warn!("[{request_id}] Structured path failed ({reason}), falling back to semantic");
                        let (context, count) =
                            self.semantic_context(standalone, category, trace).await;
                        (
                            context,
                            count,
                            format!("{}→{}", Intent::Structured, Intent::Semantic),
                        )
                    }
                }
            }
            Ok(Intent::Hybrid) => {
                let started = Instant::now();
                let hybrid = self.hybrid_context(request_id, standalone, category).await;
                trace.record(STAGE_HYBRID_EXEC, started.elapsed());

                match hybrid {
                    Ok((context, count)) => (context, count, Intent::Hybrid.to_string()),
                    Err(e) => {
                        warn!("[{request_id}] Hybrid path failed ({e}), falling back to semantic");
                        let (context, count) =
                            self.semantic_context(standalone, category, trace).await;
                        (
                            context,
                            count,
                            format!("{}→{}", Intent::Hybrid, Intent::Semantic),
                        )
                    }
                }
            }
            Ok(Intent::Semantic) => {
                let (context, count) = self.semantic_context(standalone, category, trace).await;
                (context, count, Intent::Semantic.to_string())
            }
            Ok(Intent::Unknown) => {
                warn!("[{request_id}] Unknown classifier label, treating as semantic");
                let (context, count) = self.semantic_context(standalone, category, trace).await;
                (
                    context,
                    count,
                    format!("{}→{}", Intent::Unknown, Intent::Semantic),
                )
            }
            Ok(Intent::OffTopic) => {
                unreachable!("off-topic short-circuits before context assembly")
            }
            Err(_) => {
                let (context, count) = self.semantic_context(standalone, category, trace).await;
                (context, count, Intent::Semantic.to_string())
            }
        }
    }

    /// Semantic retrieval with graceful degradation to an empty context
    async fn semantic_context(
        &self,
        standalone: &str,
        category: Option<&str>,
        trace: &mut PipelineTrace,
    ) -> (String, usize) {
        let started = Instant::now();
        let result = self
            .retriever
            .retrieve(
                standalone,
                self.retrieval.recall_k,
                self.retrieval.rerank_top_n,
                category,
            )
            .await;
        trace.record(STAGE_SEMANTIC_EXEC, started.elapsed());

        match result {
            Ok(docs) => {
                let count = docs.len();
                (self.assembler.format_documents(&docs), count)
            }
            Err(e) => {
                error!("Semantic retrieval failed: {e}");
                (String::new(), 0)
            }
        }
    }

    /// Hybrid retrieval: structured and documentary sub-steps, joined by
    /// the assembler. Sub-steps run sequentially; the assembler tolerates
    /// the structured half being absent, so a marker failure there only
    /// degrades to documentary-only context. A semantic sub-step error
    /// propagates and triggers the full fallback.
    async fn hybrid_context(
        &self,
        request_id: &str,
        standalone: &str,
        category: Option<&str>,
    ) -> Result<(String, usize)> {
        let outcome = self.structured.execute(standalone).await;
        let docs = self
            .retriever
            .retrieve(
                standalone,
                self.retrieval.hybrid_recall_k,
                self.retrieval.hybrid_top_n,
                category,
            )
            .await?;

        let structured = match &outcome {
            QueryOutcome::Success(result) => Some(result.as_str()),
            QueryOutcome::Failure(reason) => {
                warn!("[{request_id}] Hybrid structured half failed ({reason}), keeping documentary half");
                None
            }
        };

        let assembled = self.assembler.assemble(structured, &docs);
        Ok((assembled.text, assembled.sources_count))
    }
}

/// Drive the generation stream into the channel, retrying failed attempts
/// with linearly increasing backoff.
///
/// A failure after tokens were already forwarded is not retried (a replay
/// would duplicate output); the inline error marker is emitted instead.
/// Returns `false` once the receiver is gone.
async fn stream_with_retries(
    generator: &dyn TextGenerator,
    prompt: &str,
    max_retries: u32,
    tx: &mpsc::Sender<Result<AnswerChunk>>,
    answer: &mut String,
) -> bool {
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let mut stream = match generator.stream_generate(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                if attempt < max_retries {
                    warn!("Generation attempt {attempt} failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    continue;
                }
                return emit_error_marker(tx, answer, &e).await;
            }
        };

        loop {
            match stream.next().await {
                Some(Ok(token)) => {
                    answer.push_str(&token);
                    if tx.send(Ok(AnswerChunk::Token(token))).await.is_err() {
                        return false;
                    }
                }
                Some(Err(e)) => {
                    if answer.is_empty() && attempt < max_retries {
                        warn!("Generation stream failed before output, retrying: {e}");
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                        break;
                    }
                    return emit_error_marker(tx, answer, &e).await;
                }
                None => return true,
            }
        }
    }
}

async fn emit_error_marker(
    tx: &mpsc::Sender<Result<AnswerChunk>>,
    answer: &mut String,
    e: &VitaRagError,
) -> bool {
    error!("Generation failed after retries: {e}");
    let marker = format!("\n[generation error: {e}]");
    answer.push_str(&marker);
    tx.send(Ok(AnswerChunk::Token(marker))).await.is_ok()
}
