// ABOUTME: HTTP client for the hosted retrieval backend
// ABOUTME: Chooses top-k from search mode and maps every failure to RetrievalUnavailable
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::{Retriever, ScoredChunk};
use crate::config::RetrievalConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{SearchOptions, Tenant};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: u32,
    rerank: bool,
    partition: String,
    recency_bias: bool,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    scored_chunks: Vec<WireChunk>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    text: String,
    #[serde(default)]
    score: f64,
    document_id: String,
    #[serde(default)]
    document_name: String,
    #[serde(default)]
    document_metadata: Map<String, Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl From<WireChunk> for ScoredChunk {
    fn from(wire: WireChunk) -> Self {
        let mut metadata = wire.document_metadata;
        metadata.extend(wire.metadata);
        Self {
            document_id: wire.document_id,
            document_name: wire.document_name,
            text: wire.text,
            score: wire.score,
            metadata,
        }
    }
}

/// Retriever backed by the hosted search API
pub struct HttpRetriever {
    client: Client,
    config: RetrievalConfig,
}

impl HttpRetriever {
    /// Create a retriever
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: RetrievalConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Chunks to request for the given flags
    ///
    /// Breadth mode and reranking both widen the candidate set.
    #[must_use]
    pub const fn top_k(&self, options: &SearchOptions) -> u32 {
        if options.is_breadth || options.rerank_enabled {
            self.config.breadth_top_k
        } else {
            self.config.depth_top_k
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    #[instrument(skip(self, tenant, query), fields(tenant_id = %tenant.id))]
    async fn retrieve(
        &self,
        tenant: &Tenant,
        query: &str,
        options: &SearchOptions,
    ) -> AppResult<Vec<ScoredChunk>> {
        let body = RetrieveRequest {
            query,
            top_k: self.top_k(options),
            rerank: options.rerank_enabled,
            partition: tenant.id.to_string(),
            recency_bias: options.prioritize_recent,
        };
        let url = format!("{}/retrievals", self.config.base_url.trim_end_matches('/'));

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Retrieval request failed");
            AppError::retrieval_unavailable(format!("Retrieval request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Retrieval backend returned an error");
            return Err(AppError::retrieval_unavailable(format!(
                "Retrieval backend returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: RetrieveResponse = response.json().await.map_err(|e| {
            AppError::retrieval_unavailable(format!("Invalid retrieval response: {e}"))
        })?;

        debug!(chunks = parsed.scored_chunks.len(), top_k = body.top_k, "Retrieved chunks");
        Ok(parsed.scored_chunks.into_iter().map(ScoredChunk::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn retriever() -> HttpRetriever {
        HttpRetriever::new(RetrievalConfig {
            base_url: "http://127.0.0.1:9".to_owned(),
            api_key: None,
            timeout: Duration::from_millis(200),
            depth_top_k: 6,
            breadth_top_k: 100,
        })
        .unwrap()
    }

    #[test]
    fn test_top_k_follows_search_mode() {
        let r = retriever();
        assert_eq!(r.top_k(&SearchOptions::default()), 6);
        assert_eq!(
            r.top_k(&SearchOptions {
                is_breadth: true,
                ..SearchOptions::default()
            }),
            100
        );
        assert_eq!(
            r.top_k(&SearchOptions {
                rerank_enabled: true,
                ..SearchOptions::default()
            }),
            100
        );
    }

    #[test]
    fn test_wire_chunk_merges_metadata() {
        let wire: WireChunk = serde_json::from_str(
            r#"{"text":"t","score":0.5,"document_id":"d","document_name":"n",
                "document_metadata":{"source_url":"https://x","start_page":1},
                "metadata":{"start_page":2}}"#,
        )
        .unwrap();
        let chunk = ScoredChunk::from(wire);
        assert_eq!(chunk.metadata["source_url"], "https://x");
        assert_eq!(chunk.metadata["start_page"], 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_retrieval_unavailable() {
        let tenant = crate::models::Tenant::new(
            "Acme".to_owned(),
            "acme".to_owned(),
            crate::models::ChatbotSettings {
                grounding_prompt: None,
                welcome_message: None,
                enabled_models: vec![],
                default_model: "gpt-4o".to_owned(),
            },
        );
        let err = retriever()
            .retrieve(&tenant, "refunds", &SearchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::RetrievalUnavailable);
    }
}
