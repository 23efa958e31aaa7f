//! Question reformulation against conversation history

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::backends::TextGenerator;
use crate::models::ChatTurn;
use crate::rag::prompts;

/// Rewrites a follow-up question into a standalone one.
///
/// Reformulation is a best-effort enhancement: every backend failure falls
/// back to the original question and nothing propagates to the caller.
pub struct QuestionRephraser {
    generator: Arc<dyn TextGenerator>,
    context_turns: usize,
}

impl QuestionRephraser {
    pub fn new(generator: Arc<dyn TextGenerator>, context_turns: usize) -> Self {
        Self {
            generator,
            context_turns,
        }
    }

    /// Produce a standalone question. With an empty history the input is
    /// returned unchanged and no generation call is made.
    pub async fn rephrase(&self, question: &str, history: &[ChatTurn]) -> String {
        if history.is_empty() {
            return question.to_string();
        }

        let window_start = history.len().saturating_sub(self.context_turns);
        let transcript = history[window_start..]
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = prompts::build_rephrase_prompt(&transcript, question);

        match self.generator.generate(&prompt, 0.0).await {
            Ok(rephrased) => {
                let rephrased = rephrased.trim();
                if rephrased.is_empty() {
                    question.to_string()
                } else {
                    debug!("Rephrased '{question}' into '{rephrased}'");
                    rephrased.to_string()
                }
            }
            Err(e) => {
                warn!("Rephrasing failed, keeping original question: {e}");
                question.to_string()
            }
        }
    }
}
