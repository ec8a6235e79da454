// ABOUTME: Retrieval contract returning scored chunks for a tenant query
// ABOUTME: Chunks project into citation sources in the order they are injected into prompts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Retrieval
//!
//! A failed retrieval aborts the turn before any assistant message exists;
//! an empty result is a normal outcome and generation proceeds.

mod http;

pub use http::HttpRetriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppResult;
use crate::models::{SearchOptions, Source, Tenant};

/// A retrieved passage with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Document the passage came from
    pub document_id: String,
    /// Human readable document name
    pub document_name: String,
    /// Passage text
    pub text: String,
    /// Relevance score from the backend
    pub score: f64,
    /// Document and chunk metadata (url, source type, page and time ranges)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ScoredChunk {
    /// Project the chunk into a citation source
    #[must_use]
    pub fn to_source(&self) -> Source {
        let text = |key: &str| {
            self.metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        let page = |key: &str| {
            self.metadata
                .get(key)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
        };
        let seconds = |key: &str| self.metadata.get(key).and_then(Value::as_f64);

        Source {
            document_id: self.document_id.clone(),
            document_name: self.document_name.clone(),
            url: text("source_url").or_else(|| text("url")),
            source_type: text("source_type"),
            start_page: page("start_page"),
            end_page: page("end_page"),
            start_time: seconds("start_time"),
            end_time: seconds("end_time"),
        }
    }
}

/// Source of grounding chunks for a tenant
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve chunks relevant to `query`
    ///
    /// # Errors
    ///
    /// Returns `RetrievalUnavailable` when the backend cannot answer
    async fn retrieve(
        &self,
        tenant: &Tenant,
        query: &str,
        options: &SearchOptions,
    ) -> AppResult<Vec<ScoredChunk>>;
}
