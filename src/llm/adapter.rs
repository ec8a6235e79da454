// ABOUTME: Model adapter resolving logical models to providers and normalizing their replies
// ABOUTME: Generation yields a partial-reply stream or a single final reply per model capability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use serde::de::DeserializeOwned;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, instrument};

use super::registry::{ModelRegistry, ModelSpec, ProviderKind, StructuredOutputMode};
use super::structured::{parse_json_answer, parse_reply, partial_message, reply_format, GeneratedReply};
use super::{
    ChatMessage, ChatRequest, GeminiProvider, LlmProvider, MessageRole, OpenAiCompatibleConfig,
    OpenAiCompatibleProvider, ResponseFormat,
};
use crate::config::LlmConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Tenant;

/// Partially received reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialReply {
    /// Message text received so far
    pub message: String,
}

/// Item produced while a reply streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// The message grew
    Partial(PartialReply),
    /// Generation finished
    Final(GeneratedReply),
}

/// Stream of generation events ending with exactly one `Final`
pub type PartialStream = Pin<Box<dyn Stream<Item = AppResult<GenerationEvent>> + Send>>;

/// Result of starting a generation
pub enum GenerationHandle {
    /// Partial replies followed by the final reply
    Streaming(PartialStream),
    /// The final reply, produced in one call
    Complete(GeneratedReply),
}

impl GenerationHandle {
    /// Drive the generation to its final reply, reporting partial replies
    ///
    /// # Errors
    ///
    /// Returns the provider error, or an error if the stream ends without a
    /// final reply
    pub async fn drive<F>(self, mut on_partial: F) -> AppResult<GeneratedReply>
    where
        F: FnMut(PartialReply) + Send,
    {
        match self {
            Self::Complete(reply) => Ok(reply),
            Self::Streaming(mut events) => {
                while let Some(event) = events.next().await {
                    match event? {
                        GenerationEvent::Partial(partial) => on_partial(partial),
                        GenerationEvent::Final(reply) => return Ok(reply),
                    }
                }
                Err(AppError::external_service("llm", "Stream ended without a reply"))
            }
        }
    }

    /// Wait for the final reply, discarding partial replies
    ///
    /// # Errors
    ///
    /// Same as [`Self::drive`]
    pub async fn into_final(self) -> AppResult<GeneratedReply> {
        self.drive(|_| {}).await
    }
}

/// Turns logical model ids into provider calls with normalized output
#[derive(Clone)]
pub struct ModelAdapter {
    registry: Arc<ModelRegistry>,
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl ModelAdapter {
    /// Adapter with no providers
    #[must_use]
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            providers: HashMap::new(),
        }
    }

    /// Register the provider serving `kind`
    #[must_use]
    pub fn with_provider(mut self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    /// Build the default registry and every provider with credentials
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created
    pub fn from_config(config: &LlmConfig) -> AppResult<Self> {
        let mut adapter = Self::new(ModelRegistry::with_defaults());
        let timeout = config.request_timeout;

        if let Some(key) = &config.openai_api_key {
            let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig::openai(
                &config.openai_base_url,
                Some(key.clone()),
                timeout,
            ))?;
            adapter = adapter.with_provider(ProviderKind::OpenAi, Arc::new(provider));
        }
        if let Some(key) = &config.groq_api_key {
            let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig::groq(
                &config.groq_base_url,
                Some(key.clone()),
                timeout,
            ))?;
            adapter = adapter.with_provider(ProviderKind::Groq, Arc::new(provider));
        }
        if let Some(key) = &config.gemini_api_key {
            let provider = GeminiProvider::new(&config.gemini_base_url, key, timeout)?;
            adapter = adapter.with_provider(ProviderKind::Gemini, Arc::new(provider));
        }
        if let Some(base_url) = &config.local_base_url {
            let provider =
                OpenAiCompatibleProvider::new(OpenAiCompatibleConfig::local(base_url, timeout))?;
            adapter = adapter.with_provider(ProviderKind::Local, Arc::new(provider));
        }

        info!(
            providers = ?adapter.providers.keys().collect::<Vec<_>>(),
            "Model adapter initialized"
        );
        Ok(adapter)
    }

    /// The model table
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Registered providers, for health reporting
    #[must_use]
    pub fn providers(&self) -> Vec<(ProviderKind, Arc<dyn LlmProvider>)> {
        self.providers
            .iter()
            .map(|(kind, provider)| (*kind, Arc::clone(provider)))
            .collect()
    }

    fn lookup(&self, model_id: &str) -> AppResult<(&ModelSpec, &Arc<dyn LlmProvider>)> {
        let spec = self
            .registry
            .get(model_id)
            .ok_or_else(|| AppError::invalid_input(format!("Unknown model '{model_id}'")))?;
        let provider = self.providers.get(&spec.provider).ok_or_else(|| {
            AppError::config(format!("No provider configured for model '{model_id}'"))
        })?;
        Ok((spec, provider))
    }

    /// Start generating a structured reply
    ///
    /// Models that cannot stream partial replies return
    /// [`GenerationHandle::Complete`].
    ///
    /// # Errors
    ///
    /// Returns `ModelDisabled` if the tenant has not enabled `model_id`
    /// (checked before any provider call), or the provider error
    #[instrument(skip(self, tenant, messages), fields(tenant_id = %tenant.id, model = %model_id))]
    pub async fn generate(
        &self,
        tenant: &Tenant,
        messages: &[ChatMessage],
        model_id: &str,
    ) -> AppResult<GenerationHandle> {
        if !tenant.chatbot.is_model_enabled(model_id) {
            return Err(AppError::model_disabled(model_id));
        }
        let (spec, provider) = self.lookup(model_id)?;

        let response_format = match spec.structured_output {
            StructuredOutputMode::NativeSchema => reply_format(),
            StructuredOutputMode::JsonMode => ResponseFormat::JsonObject,
            StructuredOutputMode::PromptInstructed => ResponseFormat::Text,
        };
        let request = ChatRequest::new(
            spec.provider_model.clone(),
            with_system_override(messages, spec.system_prompt_override.as_deref()),
        )
        .with_temperature(spec.temperature)
        .with_response_format(response_format);

        if spec.streams_partial && provider.capabilities().supports_streaming() {
            debug!(provider = provider.name(), "Streaming structured reply");
            let chunks = provider.complete_stream(&request.with_streaming()).await?;
            return Ok(GenerationHandle::Streaming(partial_replies(chunks)));
        }

        debug!(provider = provider.name(), "Requesting complete structured reply");
        let response = provider.complete(&request).await?;
        Ok(GenerationHandle::Complete(parse_reply(&response.content)))
    }

    /// Ask a model for a small JSON answer (qualification gates, titles)
    ///
    /// # Errors
    ///
    /// Returns the provider error, or an error if the output does not parse
    #[instrument(skip(self, messages), fields(model = %model_id))]
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> AppResult<T> {
        let (spec, provider) = self.lookup(model_id)?;
        let format = if provider.capabilities().supports_json_mode() {
            ResponseFormat::JsonObject
        } else {
            ResponseFormat::Text
        };
        let request = ChatRequest::new(spec.provider_model.clone(), messages.to_vec())
            .with_temperature(Some(0.0))
            .with_response_format(format);

        let response = provider.complete(&request).await?;
        parse_json_answer(&response.content).ok_or_else(|| {
            AppError::external_service(provider.name(), "Model returned an unparseable answer")
        })
    }
}

/// Append a model-specific instruction to the system prompt
fn with_system_override(messages: &[ChatMessage], system_override: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = messages.to_vec();
    let Some(extra) = system_override else {
        return messages;
    };
    match messages.iter_mut().find(|m| m.role == MessageRole::System) {
        Some(system) => {
            system.content.push_str("\n\n");
            system.content.push_str(extra);
        }
        None => messages.insert(0, ChatMessage::system(extra)),
    }
    messages
}

/// Turn raw deltas into partial replies and one final reply
fn partial_replies(mut chunks: super::ChatStream) -> PartialStream {
    Box::pin(stream! {
        let mut buffer = String::new();
        let mut last_sent = 0;

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    buffer.push_str(&chunk.delta);
                    if let Some(message) = partial_message(&buffer) {
                        if message.len() > last_sent {
                            last_sent = message.len();
                            yield Ok(GenerationEvent::Partial(PartialReply { message }));
                        }
                    }
                    if chunk.is_final {
                        break;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        yield Ok(GenerationEvent::Final(parse_reply(&buffer)));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ChatStream, LlmCapabilities, StreamChunk};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        chunks: Vec<&'static str>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn capabilities(&self) -> LlmCapabilities {
            LlmCapabilities::text_only() | LlmCapabilities::JSON_MODE
        }

        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ChatResponse {
                content: self.chunks.concat(),
                model: request.model.clone(),
                usage: None,
                finish_reason: Some("stop".to_owned()),
            })
        }

        async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
            self.requests.lock().unwrap().push(request.clone());
            let items: Vec<Result<StreamChunk, AppError>> = self
                .chunks
                .iter()
                .map(|delta| {
                    Ok(StreamChunk {
                        delta: (*delta).to_owned(),
                        is_final: false,
                        finish_reason: None,
                    })
                })
                .collect();
            Ok(Box::pin(tokio_stream::iter(items)))
        }

        async fn health_check(&self) -> Result<bool, AppError> {
            Ok(true)
        }
    }

    fn tenant(models: &[&str]) -> Tenant {
        Tenant::new(
            "Acme".to_owned(),
            "acme".to_owned(),
            crate::models::ChatbotSettings {
                grounding_prompt: None,
                welcome_message: None,
                enabled_models: models.iter().map(|m| (*m).to_owned()).collect(),
                default_model: "gpt-4o".to_owned(),
            },
        )
    }

    fn adapter(kind: ProviderKind, chunks: Vec<&'static str>) -> (ModelAdapter, Arc<Scripted>) {
        let provider = Arc::new(Scripted {
            chunks,
            requests: Mutex::new(Vec::new()),
        });
        let adapter = ModelAdapter::new(ModelRegistry::with_defaults())
            .with_provider(kind, Arc::clone(&provider) as Arc<dyn LlmProvider>);
        (adapter, provider)
    }

    #[tokio::test]
    async fn test_streaming_model_yields_partials_then_final() {
        let (adapter, _) = adapter(
            ProviderKind::OpenAi,
            vec![r#"{"message":"Ref"#, r#"unds take"#, r#" 30 days","usedSourceIndexes":[0]}"#],
        );
        let handle = adapter
            .generate(&tenant(&[]), &[ChatMessage::user("refunds?")], "gpt-4o")
            .await
            .unwrap();
        assert!(matches!(handle, GenerationHandle::Streaming(_)));

        let mut partials = Vec::new();
        let reply = handle.drive(|p| partials.push(p.message)).await.unwrap();
        assert_eq!(partials, vec!["Ref", "Refunds take", "Refunds take 30 days"]);
        assert_eq!(reply.message, "Refunds take 30 days");
        assert_eq!(reply.used_source_indexes, vec![0]);
    }

    #[tokio::test]
    async fn test_json_mode_model_gets_instructions_and_completes() {
        let (adapter, provider) = adapter(
            ProviderKind::Groq,
            vec![r#"{"message":"Hi","usedSourceIndexes":[]}"#],
        );
        let handle = adapter
            .generate(
                &tenant(&["llama-3.3-70b-versatile"]),
                &[ChatMessage::system("Ground yourself"), ChatMessage::user("hello")],
                "llama-3.3-70b-versatile",
            )
            .await
            .unwrap();
        assert!(matches!(handle, GenerationHandle::Complete(_)));
        assert_eq!(handle.into_final().await.unwrap().message, "Hi");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].response_format, ResponseFormat::JsonObject);
        assert!(requests[0].messages[0].content.starts_with("Ground yourself"));
        assert!(requests[0].messages[0].content.contains("usedSourceIndexes"));
    }

    #[tokio::test]
    async fn test_disabled_model_rejected_before_call() {
        let (adapter, provider) = adapter(ProviderKind::OpenAi, vec!["{}"]);
        let err = adapter
            .generate(&tenant(&[]), &[ChatMessage::user("hi")], "gpt-4o-mini")
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, crate::errors::ErrorCode::ModelDisabled);
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_json_parses_answer() {
        #[derive(serde::Deserialize)]
        struct Title {
            title: String,
        }
        let (adapter, _) = adapter(ProviderKind::OpenAi, vec![r#"{"title":"Refund policy"}"#]);
        let title: Title = adapter
            .complete_json("gpt-4o-mini", &[ChatMessage::user("name it")])
            .await
            .unwrap();
        assert_eq!(title.title, "Refund policy");
    }
}
