// ABOUTME: Google Gemini provider using generateContent and streamGenerateContent
// ABOUTME: Structured replies use the JSON response mime type plus a response schema
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Gemini Provider
//!
//! System messages move to `systemInstruction`; assistant turns use the
//! `model` role.

use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::sse_parser::{create_sse_stream, is_retryable_status};
use super::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, LlmCapabilities, LlmProvider, MessageRole,
    ResponseFormat, StreamChunk, TokenUsage,
};
use crate::errors::{AppError, ErrorCode};

const PROVIDER: &str = "gemini";

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl Candidate {
    fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    /// Create a provider
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn build_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{model}:{method}",
            self.base_url.trim_end_matches('/')
        )
    }

    fn convert_messages(messages: &[ChatMessage]) -> (Vec<Content>, Option<Content>) {
        let mut system_text: Vec<&str> = Vec::new();
        let mut contents = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = match msg.role {
                MessageRole::System => {
                    system_text.push(&msg.content);
                    continue;
                }
                MessageRole::User => "user",
                MessageRole::Assistant => "model",
            };
            contents.push(Content {
                role: Some(role.to_owned()),
                parts: vec![Part {
                    text: Some(msg.content.clone()),
                }],
            });
        }

        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(system_text.join("\n\n")),
            }],
        });
        (contents, system_instruction)
    }

    fn build_request(request: &ChatRequest) -> GeminiRequest {
        let (contents, system_instruction) = Self::convert_messages(&request.messages);
        let (response_mime_type, response_schema) = match &request.response_format {
            ResponseFormat::Text => (None, None),
            ResponseFormat::JsonObject => (Some("application/json"), None),
            ResponseFormat::JsonSchema { schema, .. } => {
                let mut schema = schema.clone();
                strip_unsupported_schema_keys(&mut schema);
                (Some("application/json"), Some(schema))
            }
        };

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type,
                response_schema,
            },
        }
    }

    async fn post(&self, url: &str, body: &GeminiRequest, sse: bool) -> Result<reqwest::Response, AppError> {
        let mut http_request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body);
        if sse {
            http_request = http_request.query(&[("alt", "sse")]);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::timeout("gemini completion")
            } else {
                AppError::external_unavailable(PROVIDER, format!("Failed to connect: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(map_api_error(status.as_u16(), &text))
    }
}

/// Gemini accepts an `OpenAPI` subset; drop keywords it rejects
fn strip_unsupported_schema_keys(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("additionalProperties");
            map.remove("$schema");
            for value in map.values_mut() {
                strip_unsupported_schema_keys(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_unsupported_schema_keys),
        _ => {}
    }
}

fn map_api_error(status: u16, body: &str) -> AppError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| body.chars().take(200).collect::<String>(),
        |envelope| envelope.error.message,
    );
    match status {
        401 | 403 => AppError::new(
            ErrorCode::ExternalAuthFailed,
            format!("gemini rejected the API key: {detail}"),
        ),
        429 => AppError::new(
            ErrorCode::ExternalRateLimited,
            format!("gemini quota exceeded: {detail}"),
        ),
        code if is_retryable_status(code) => AppError::external_unavailable(PROVIDER, detail),
        _ => AppError::external_service(PROVIDER, format!("{status}: {detail}")),
    }
}

fn parse_stream_payload(payload: &str) -> Option<Result<StreamChunk, AppError>> {
    match serde_json::from_str::<GeminiResponse>(payload) {
        Ok(parsed) => parsed.candidates.first().map(|candidate| {
            Ok(StreamChunk {
                delta: candidate.text(),
                is_final: candidate.finish_reason.is_some(),
                finish_reason: candidate.finish_reason.clone(),
            })
        }),
        Err(e) => {
            warn!(error = %e, "Skipping unparseable Gemini stream payload");
            None
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
            | LlmCapabilities::JSON_MODE
            | LlmCapabilities::STRUCTURED_OUTPUT
    }

    #[instrument(skip(self, request), fields(provider = PROVIDER, model = %request.model))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let url = self.build_url(&request.model, "generateContent");
        let body = Self::build_request(request);
        debug!(contents = body.contents.len(), "Sending Gemini completion");

        let response = self.post(&url, &body, false).await?;
        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            AppError::external_service(PROVIDER, format!("Failed to parse response: {e}"))
        })?;

        let candidate = parsed
            .candidates
            .first()
            .ok_or_else(|| AppError::external_service(PROVIDER, "API returned no candidates"))?;

        Ok(ChatResponse {
            content: candidate.text(),
            model: request.model.clone(),
            usage: parsed.usage_metadata.as_ref().map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            finish_reason: candidate.finish_reason.clone(),
        })
    }

    #[instrument(skip(self, request), fields(provider = PROVIDER, model = %request.model))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let url = self.build_url(&request.model, "streamGenerateContent");
        let body = Self::build_request(request);

        let response = self.post(&url, &body, true).await?;
        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_stream_payload,
            PROVIDER,
        ))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::external_unavailable(PROVIDER, format!("Health check failed: {e}")))?;
        Ok(response.status().is_success())
    }
}

impl Debug for GeminiProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
