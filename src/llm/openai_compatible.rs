// ABOUTME: OpenAI-compatible chat completions provider for OpenAI, Groq and local servers
// ABOUTME: Maps response formats to json_schema or json_object and streams via the SSE parser
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # `OpenAI`-Compatible Provider
//!
//! One implementation serves every endpoint speaking the `OpenAI` chat
//! completions protocol. The presets differ only in base URL, key and
//! capabilities.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, instrument, warn};

use super::sse_parser::{create_sse_stream, is_retryable_status};
use super::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, LlmCapabilities, LlmProvider,
    ResponseFormat, StreamChunk, TokenUsage,
};
use crate::errors::{AppError, ErrorCode};

const CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for an `OpenAI`-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL including the version segment (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    /// Bearer key; optional for local servers
    pub api_key: Option<String>,
    /// Provider name used in logs and errors
    pub provider_name: &'static str,
    /// Capabilities of this endpoint
    pub capabilities: LlmCapabilities,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl OpenAiCompatibleConfig {
    /// `OpenAI` with native schema enforcement
    #[must_use]
    pub fn openai(base_url: &str, api_key: Option<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_owned(),
            api_key,
            provider_name: "openai",
            capabilities: LlmCapabilities::text_only()
                | LlmCapabilities::STRUCTURED_OUTPUT
                | LlmCapabilities::JSON_MODE,
            request_timeout,
        }
    }

    /// Groq-hosted open models; JSON mode without schema enforcement
    #[must_use]
    pub fn groq(base_url: &str, api_key: Option<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_owned(),
            api_key,
            provider_name: "groq",
            capabilities: LlmCapabilities::text_only() | LlmCapabilities::JSON_MODE,
            request_timeout,
        }
    }

    /// Local server (Ollama, vLLM) with plain text output
    #[must_use]
    pub fn local(base_url: &str, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_owned(),
            api_key: None,
            provider_name: "local",
            capabilities: LlmCapabilities::text_only(),
            request_timeout,
        }
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Provider for any `OpenAI` chat completions endpoint
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a provider
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/'))
    }

    /// Translate the requested format into what this endpoint understands
    fn wire_response_format(&self, format: &ResponseFormat) -> Option<Value> {
        let caps = self.config.capabilities;
        match format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonSchema { name, schema } if caps.supports_structured_output() => {
                Some(json!({
                    "type": "json_schema",
                    "json_schema": { "name": name, "schema": schema, "strict": true }
                }))
            }
            ResponseFormat::JsonSchema { .. } | ResponseFormat::JsonObject
                if caps.supports_json_mode() =>
            {
                Some(json!({ "type": "json_object" }))
            }
            ResponseFormat::JsonSchema { .. } | ResponseFormat::JsonObject => None,
        }
    }

    fn build_body<'a>(&self, request: &'a ChatRequest, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            response_format: self.wire_response_format(&request.response_format),
        }
    }

    async fn send(&self, body: &CompletionRequest<'_>) -> Result<reqwest::Response, AppError> {
        let mut http_request = self.client.post(self.api_url("chat/completions")).json(body);
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await.map_err(|e| {
            error!(provider = self.config.provider_name, error = %e, "Request failed");
            if e.is_timeout() {
                AppError::timeout(format!("{} completion", self.config.provider_name))
            } else {
                AppError::external_unavailable(
                    self.config.provider_name,
                    format!("Failed to connect: {e}"),
                )
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(self.parse_error_response(status, &text))
    }

    fn parse_error_response(&self, status: reqwest::StatusCode, body: &str) -> AppError {
        let provider = self.config.provider_name;
        let detail = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
            |_| body.chars().take(200).collect::<String>(),
            |envelope| envelope.error.message,
        );

        match status.as_u16() {
            401 | 403 => AppError::new(
                ErrorCode::ExternalAuthFailed,
                format!("{provider} rejected the API key: {detail}"),
            ),
            429 => AppError::new(
                ErrorCode::ExternalRateLimited,
                format!("{provider} rate limit reached: {detail}"),
            ),
            code if is_retryable_status(code) => {
                AppError::external_unavailable(provider, format!("{status}: {detail}"))
            }
            _ => AppError::external_service(provider, format!("{status}: {detail}")),
        }
    }
}

fn parse_stream_payload(payload: &str) -> Option<Result<StreamChunk, AppError>> {
    match serde_json::from_str::<StreamPayload>(payload) {
        Ok(parsed) => parsed.choices.into_iter().next().map(|choice| {
            Ok(StreamChunk {
                delta: choice.delta.content.unwrap_or_default(),
                is_final: choice.finish_reason.is_some(),
                finish_reason: choice.finish_reason,
            })
        }),
        Err(e) => {
            warn!(error = %e, "Skipping unparseable stream payload");
            None
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        self.config.provider_name
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.config.capabilities
    }

    #[instrument(skip(self, request), fields(provider = self.config.provider_name, model = %request.model))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let body = self.build_body(request, false);
        debug!(messages = body.messages.len(), "Sending chat completion");

        let response = self.send(&body).await?;
        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            AppError::external_service(
                self.config.provider_name,
                format!("Failed to parse response: {e}"),
            )
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            AppError::external_service(self.config.provider_name, "API returned no choices")
        })?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    #[instrument(skip(self, request), fields(provider = self.config.provider_name, model = %request.model))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let body = self.build_body(request, true);
        debug!(messages = body.messages.len(), "Sending streaming chat completion");

        let response = self.send(&body).await?;
        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_stream_payload,
            self.config.provider_name,
        ))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        let mut http_request = self.client.get(self.api_url("models"));
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }
        let response = http_request.send().await.map_err(|e| {
            AppError::external_unavailable(
                self.config.provider_name,
                format!("Health check failed: {e}"),
            )
        })?;
        Ok(response.status().is_success())
    }
}
