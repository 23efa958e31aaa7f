//! Cross-encoder reranking client

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::backends::RelevanceRanker;
use crate::config::RerankConfig;
use crate::errors::Result;
use crate::errors::VitaRagError;
use crate::models::RerankHit;

/// Client for an HTTP reranking endpoint
pub struct RerankClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl RerankClient {
    /// Create a new rerank client
    ///
    /// # Errors
    /// - HTTP client build errors (invalid configuration)
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VitaRagError::Http(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

/// Parse a rerank response tolerantly: providers disagree on the result
/// array key (`results` vs `data`) and the score key (`relevance_score` vs
/// `score`). Hits pointing outside the candidate set are dropped.
fn parse_rerank_response(json: &serde_json::Value, doc_count: usize) -> Result<Vec<RerankHit>> {
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            VitaRagError::Rerank("Rerank response is missing results array".to_string())
        })?;

    let mut hits = Vec::with_capacity(results.len());
    for item in results {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| VitaRagError::Rerank("Rerank result missing index".to_string()))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| VitaRagError::Rerank("Rerank result missing score".to_string()))?
            as f32;

        if index < doc_count {
            hits.push(RerankHit { index, score });
        }
    }

    Ok(hits)
}

#[async_trait]
impl RelevanceRanker for RerankClient {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>> {
        #[derive(Serialize)]
        struct RerankRequest<'a> {
            model: &'a str,
            query: &'a str,
            documents: &'a [String],
            top_k: usize,
        }

        let url = format!("{}/rerank", self.endpoint);
        debug!("Calling rerank API: {url} ({} candidates)", documents.len());

        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_k,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VitaRagError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VitaRagError::Rerank(format!(
                "Rerank API error ({status}): {error_text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VitaRagError::Rerank(format!("Failed to parse response: {e}")))?;

        parse_rerank_response(&json, documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_provider_order() {
        let json = serde_json::json!({
            "results": [
                { "index": 2, "relevance_score": 0.91 },
                { "index": 0, "relevance_score": 0.34 }
            ]
        });
        let hits = parse_rerank_response(&json, 3).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 2);
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert_eq!(hits[1].index, 0);
    }

    #[test]
    fn test_parse_accepts_data_and_score_keys() {
        let json = serde_json::json!({
            "data": [ { "index": 1, "score": 0.5 } ]
        });
        let hits = parse_rerank_response(&json, 2).unwrap();
        assert_eq!(hits[0].index, 1);
    }

    #[test]
    fn test_parse_drops_out_of_range_index() {
        let json = serde_json::json!({
            "results": [
                { "index": 7, "relevance_score": 0.9 },
                { "index": 0, "relevance_score": 0.4 }
            ]
        });
        let hits = parse_rerank_response(&json, 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 0);
    }

    #[test]
    fn test_parse_missing_results_is_error() {
        let json = serde_json::json!({ "unexpected": true });
        assert!(parse_rerank_response(&json, 2).is_err());
    }
}
