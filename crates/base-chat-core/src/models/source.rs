// ABOUTME: Citation sources, per-turn search options and agentic run metadata
// ABOUTME: Sources are projections of retrieved chunks shown to users as citations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use serde::{Deserialize, Serialize};

/// Document-level attribution for a retrieved chunk
///
/// The model refers to sources by their position in the ordered list passed
/// with the prompt, never by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Document id in the retrieval backend
    pub document_id: String,
    /// Human readable document name
    pub document_name: String,
    /// Link to the original document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Connector type (e.g. `google_drive`, `notion`, `slack`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// First page of the cited passage (documents)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<u32>,
    /// Last page of the cited passage (documents)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_page: Option<u32>,
    /// Start offset in seconds (audio and video)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    /// End offset in seconds (audio and video)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

/// Search-mode flags active for one generation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Breadth mode retrieves many chunks across documents
    pub is_breadth: bool,
    /// Ask the backend to rerank results
    pub rerank_enabled: bool,
    /// Bias results towards recently modified documents
    pub prioritize_recent: bool,
}

/// Per-call overrides requested by a client
///
/// Each flag only takes effect when the tenant permits overriding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOverrides {
    /// Requested breadth flag
    #[serde(default)]
    pub is_breadth: Option<bool>,
    /// Requested rerank flag
    #[serde(default)]
    pub rerank_enabled: Option<bool>,
    /// Requested recency flag
    #[serde(default)]
    pub prioritize_recent: Option<bool>,
}

/// One step of a multi-step retrieval run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticStep {
    /// Step kind (search, answer, plan...)
    pub kind: String,
    /// Short summary of what the step did
    pub summary: String,
    /// Time spent in the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

/// Structured details for multi-step retrieval runs attached to a message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticInfo {
    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<AgenticStep>,
    /// Total run time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<u64>,
    /// Final answer produced by the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
}
