//! Two-stage semantic retrieval: wide recall, reranked precision

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::backends::DocumentSearcher;
use crate::backends::RelevanceRanker;
use crate::errors::Result;
use crate::models::RetrievedDocument;

/// Retrieves documents with a recall search, then narrows the candidate set
/// with a cross-encoder reranker.
///
/// Recall is never sacrificed for precision-stage faults: a reranker
/// failure degrades to the first `top_n` un-reranked candidates.
pub struct SemanticRetriever {
    searcher: Arc<dyn DocumentSearcher>,
    ranker: Arc<dyn RelevanceRanker>,
}

impl SemanticRetriever {
    pub fn new(searcher: Arc<dyn DocumentSearcher>, ranker: Arc<dyn RelevanceRanker>) -> Self {
        Self { searcher, ranker }
    }

    /// Fetch `recall_k` candidates and keep the best `top_n`
    ///
    /// # Errors
    /// - Recall stage failures (embedding generation, index search)
    pub async fn retrieve(
        &self,
        query: &str,
        recall_k: usize,
        top_n: usize,
        category: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>> {
        let candidates = self.searcher.search(query, recall_k, category).await?;

        if candidates.is_empty() {
            return Ok(candidates);
        }

        // Reranking adds no value when there is nothing to discard
        if candidates.len() <= top_n {
            return Ok(candidates);
        }

        let texts: Vec<String> = candidates.iter().map(|doc| doc.text.clone()).collect();

        match self.ranker.rerank(query, &texts, top_n).await {
            Ok(hits) => {
                let survivors = hits
                    .into_iter()
                    .filter(|hit| hit.index < candidates.len())
                    .take(top_n)
                    .map(|hit| {
                        let mut doc = candidates[hit.index].clone();
                        doc.relevance_score = Some(hit.score);
                        doc.source_rank = hit.index;
                        doc
                    })
                    .collect::<Vec<_>>();
                debug!(
                    "Reranked {} candidates down to {}",
                    candidates.len(),
                    survivors.len()
                );
                Ok(survivors)
            }
            Err(e) => {
                warn!("Reranking failed, keeping first {top_n} candidates: {e}");
                let mut fallback = candidates;
                fallback.truncate(top_n);
                Ok(fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::errors::VitaRagError;
    use crate::models::RerankHit;

    fn doc(text: &str, rank: usize) -> RetrievedDocument {
        RetrievedDocument {
            text: text.to_string(),
            category: "project".to_string(),
            metadata: serde_json::json!({}),
            relevance_score: None,
            source_rank: rank,
        }
    }

    struct FixedSearcher(Vec<RetrievedDocument>);

    #[async_trait]
    impl DocumentSearcher for FixedSearcher {
        async fn search(
            &self,
            _query: &str,
            k: usize,
            _category: Option<&str>,
        ) -> Result<Vec<RetrievedDocument>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct FailingSearcher;

    #[async_trait]
    impl DocumentSearcher for FailingSearcher {
        async fn search(
            &self,
            _query: &str,
            _k: usize,
            _category: Option<&str>,
        ) -> Result<Vec<RetrievedDocument>> {
            Err(VitaRagError::Embedding("index down".to_string()))
        }
    }

    /// Ranks documents in reverse candidate order with descending scores
    struct ReversingRanker;

    #[async_trait]
    impl RelevanceRanker for ReversingRanker {
        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
            top_k: usize,
        ) -> Result<Vec<RerankHit>> {
            Ok((0..documents.len())
                .rev()
                .take(top_k)
                .enumerate()
                .map(|(pos, index)| RerankHit {
                    index,
                    score: 0.9 - pos as f32 * 0.1,
                })
                .collect())
        }
    }

    struct FailingRanker;

    #[async_trait]
    impl RelevanceRanker for FailingRanker {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_k: usize,
        ) -> Result<Vec<RerankHit>> {
            Err(VitaRagError::Rerank("rerank down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_return_empty() {
        let retriever =
            SemanticRetriever::new(Arc::new(FixedSearcher(vec![])), Arc::new(ReversingRanker));
        let docs = retriever.retrieve("q", 10, 3, None).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_few_candidates_skip_reranking_unchanged() {
        let candidates = vec![doc("a", 0), doc("b", 1)];
        let retriever = SemanticRetriever::new(
            Arc::new(FixedSearcher(candidates)),
            // Would reorder if invoked
            Arc::new(ReversingRanker),
        );

        let docs = retriever.retrieve("q", 10, 3, None).await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "a");
        assert_eq!(docs[1].text, "b");
        // No score annotation without a precision pass
        assert!(docs.iter().all(|d| d.relevance_score.is_none()));
    }

    #[tokio::test]
    async fn test_rerank_annotates_and_bounds_results() {
        let candidates = vec![doc("a", 0), doc("b", 1), doc("c", 2), doc("d", 3), doc("e", 4)];
        let texts: Vec<String> = candidates.iter().map(|d| d.text.clone()).collect();
        let retriever =
            SemanticRetriever::new(Arc::new(FixedSearcher(candidates)), Arc::new(ReversingRanker));

        let docs = retriever.retrieve("q", 5, 2, None).await.unwrap();

        assert_eq!(docs.len(), 2);
        // Every survivor is a member of the original candidate set
        assert!(docs.iter().all(|d| texts.contains(&d.text)));
        // Reversing ranker puts the last candidate first
        assert_eq!(docs[0].text, "e");
        assert_eq!(docs[0].source_rank, 4);
        assert!((docs[0].relevance_score.unwrap() - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_ranker_failure_degrades_to_first_n() {
        let candidates = vec![doc("a", 0), doc("b", 1), doc("c", 2), doc("d", 3)];
        let retriever =
            SemanticRetriever::new(Arc::new(FixedSearcher(candidates)), Arc::new(FailingRanker));

        let docs = retriever.retrieve("q", 4, 2, None).await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "a");
        assert_eq!(docs[1].text, "b");
    }

    #[tokio::test]
    async fn test_recall_failure_propagates() {
        let retriever =
            SemanticRetriever::new(Arc::new(FailingSearcher), Arc::new(ReversingRanker));
        assert!(retriever.retrieve("q", 5, 2, None).await.is_err());
    }
}
