//! Intent classification

use std::sync::Arc;

use tracing::debug;

use crate::backends::TextGenerator;
use crate::config::PersonaConfig;
use crate::errors::Result;
use crate::models::Intent;
use crate::rag::prompts;

/// Maps a standalone question to a handling strategy.
///
/// A single constrained generation call; the model is asked for the bare
/// label token and nothing else. Output that matches no label becomes
/// `Intent::Unknown` - deciding what to do with that is the orchestrator's
/// job, not this component's.
pub struct IntentClassifier {
    generator: Arc<dyn TextGenerator>,
    persona: PersonaConfig,
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, persona: PersonaConfig) -> Self {
        Self { generator, persona }
    }

    /// Classify a standalone question
    ///
    /// # Errors
    /// - Generation backend failures (network, timeout, rate limit)
    pub async fn classify(&self, question: &str) -> Result<Intent> {
        let prompt = prompts::build_classifier_prompt(&self.persona, question);
        let raw = self.generator.generate(&prompt, 0.0).await?;
        let intent = Intent::parse_label(&raw);
        debug!("Classified '{question}' as {intent} (raw: {raw:?})");
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backends::TokenStream;
    use crate::errors::VitaRagError;

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn stream_generate(&self, _prompt: &str) -> Result<TokenStream> {
            unimplemented!("not used by the classifier")
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Err(VitaRagError::Generation("boom".to_string()))
        }

        async fn stream_generate(&self, _prompt: &str) -> Result<TokenStream> {
            unimplemented!("not used by the classifier")
        }
    }

    #[tokio::test]
    async fn test_classify_parses_label() {
        let classifier = IntentClassifier::new(
            Arc::new(FixedGenerator("STRUCTURED\n")),
            PersonaConfig::default(),
        );
        let intent = classifier.classify("How many projects?").await.unwrap();
        assert_eq!(intent, Intent::Structured);
    }

    #[tokio::test]
    async fn test_classify_unexpected_output_is_unknown() {
        let classifier = IntentClassifier::new(
            Arc::new(FixedGenerator("Well, that depends...")),
            PersonaConfig::default(),
        );
        let intent = classifier.classify("Hello").await.unwrap();
        assert_eq!(intent, Intent::Unknown);
    }

    #[tokio::test]
    async fn test_classify_propagates_backend_error() {
        let classifier =
            IntentClassifier::new(Arc::new(FailingGenerator), PersonaConfig::default());
        assert!(classifier.classify("Hello").await.is_err());
    }
}
