//! Context assembly from retrieved evidence

use crate::models::RetrievedDocument;
use crate::rag::prompts::NO_CONTEXT_PLACEHOLDER;

/// Separator between document blocks, kept visible for the generator
const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Assembled evidence handed to the generation stage
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub sources_count: usize,
}

/// Merges structured and/or semantic retrieval output into one formatted
/// context block with provenance counts.
#[derive(Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Format semantic documents into labeled source blocks.
    ///
    /// Empty input yields the fixed placeholder, never an empty string -
    /// generation must always receive non-empty guidance.
    pub fn format_documents(&self, documents: &[RetrievedDocument]) -> String {
        if documents.is_empty() {
            return NO_CONTEXT_PLACEHOLDER.to_string();
        }

        documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| {
                let mut block = format!("[Source {} - {}]\n{}", idx + 1, doc.category, doc.text);
                if let Some(score) = doc.relevance_score {
                    block.push_str(&format!("\n(Relevance: {score:.2})"));
                }
                block
            })
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }

    /// Merge the structured and/or semantic halves into one context.
    ///
    /// Either half may be absent; with both present the structured section
    /// precedes the documentary one under distinct labels.
    pub fn assemble(
        &self,
        structured: Option<&str>,
        documents: &[RetrievedDocument],
    ) -> AssembledContext {
        match (structured, documents.is_empty()) {
            (None, true) => AssembledContext {
                text: NO_CONTEXT_PLACEHOLDER.to_string(),
                sources_count: 0,
            },
            (Some(result), true) => AssembledContext {
                text: result.to_string(),
                sources_count: 1,
            },
            (None, false) => AssembledContext {
                text: self.format_documents(documents),
                sources_count: documents.len(),
            },
            (Some(result), false) => AssembledContext {
                text: format!(
                    "Structured data:\n{result}\n\nDocumentary context:\n{}",
                    self.format_documents(documents)
                ),
                sources_count: documents.len() + 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str, category: &str, score: Option<f32>) -> RetrievedDocument {
        RetrievedDocument {
            text: text.to_string(),
            category: category.to_string(),
            metadata: serde_json::json!({}),
            relevance_score: score,
            source_rank: 0,
        }
    }

    #[test]
    fn test_empty_input_yields_placeholder() {
        let assembler = ContextAssembler::new();
        let context = assembler.assemble(None, &[]);
        assert_eq!(context.text, NO_CONTEXT_PLACEHOLDER);
        assert!(!context.text.is_empty());
        assert_eq!(context.sources_count, 0);
    }

    #[test]
    fn test_documents_render_labeled_blocks() {
        let assembler = ContextAssembler::new();
        let docs = vec![
            doc("Built a web app", "project", Some(0.92)),
            doc("Knows Rust", "skill", None),
        ];

        let text = assembler.format_documents(&docs);

        assert!(text.contains("[Source 1 - project]"));
        assert!(text.contains("Built a web app"));
        assert!(text.contains("(Relevance: 0.92)"));
        assert!(text.contains("[Source 2 - skill]"));
        assert!(text.contains("\n\n---\n\n"));
        // Unreranked documents carry no score line
        assert_eq!(text.matches("Relevance").count(), 1);
    }

    #[test]
    fn test_structured_only() {
        let assembler = ContextAssembler::new();
        let context = assembler.assemble(Some("count: 7"), &[]);
        assert_eq!(context.text, "count: 7");
        assert_eq!(context.sources_count, 1);
    }

    #[test]
    fn test_hybrid_sections_in_order() {
        let assembler = ContextAssembler::new();
        let docs = vec![doc("Latest project details", "project", Some(0.8))];

        let context = assembler.assemble(Some("id: 3, year: 2024"), &docs);

        assert_eq!(context.sources_count, 2);
        let structured_at = context.text.find("Structured data:").unwrap();
        let documentary_at = context.text.find("Documentary context:").unwrap();
        assert!(structured_at < documentary_at);
        assert!(context.text.contains("id: 3, year: 2024"));
        assert!(context.text.contains("Latest project details"));
    }
}
