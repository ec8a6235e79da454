// ABOUTME: Test doubles and fixtures shared by unit and integration tests
// ABOUTME: Scripted model provider, static retriever, recording Slack client and seed helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio_stream::StreamExt;

use crate::config::{
    ChatConfig, DatabaseUrl, Environment, LlmConfig, LogLevel, RetrievalConfig, ServerConfig,
    SlackConfig,
};
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::llm::{
    ChatRequest, ChatResponse, ChatStream, LlmCapabilities, LlmProvider, StreamChunk,
};
use crate::models::{
    ChatbotSettings, Profile, ProfileRole, SearchOptions, SlackChannelMode, SlackInstallation,
    Source, Tenant,
};
use crate::retrieval::{Retriever, ScoredChunk};
use crate::slack::{SlackApi, SlackPost};

/// Bot user id installed by [`with_slack`]
pub const TEST_BOT_USER: &str = "B0TEST";
/// Bot token installed by [`with_slack`]
pub const TEST_BOT_TOKEN: &str = "xoxb-test";

/// Tenant with `gpt-4o` as default and `gpt-4o-mini` enabled
#[must_use]
pub fn test_tenant(name: &str) -> Tenant {
    Tenant::new(
        name.to_owned(),
        name.to_lowercase().replace(' ', "-"),
        ChatbotSettings {
            grounding_prompt: None,
            welcome_message: None,
            enabled_models: vec!["gpt-4o".to_owned(), "gpt-4o-mini".to_owned()],
            default_model: "gpt-4o".to_owned(),
        },
    )
}

/// Attach a Slack installation for `team_id`
#[must_use]
pub fn with_slack(mut tenant: Tenant, team_id: &str) -> Tenant {
    tenant.slack = Some(SlackInstallation {
        team_id: team_id.to_owned(),
        bot_token: TEST_BOT_TOKEN.to_owned(),
        bot_user_id: Some(TEST_BOT_USER.to_owned()),
        default_channel_mode: SlackChannelMode::AnswerQuestions,
        channel_modes: HashMap::new(),
    });
    tenant
}

/// Web user profile in `tenant`
///
/// # Panics
///
/// Panics if the database rejects the seed rows
#[allow(clippy::panic)]
pub async fn seed_profile(database: &Database, tenant: &Tenant, external_id: &str) -> Profile {
    let seeded = async {
        let user = database.find_or_create_user("web", external_id, None).await?;
        database
            .find_or_create_profile(tenant.id, user.id, ProfileRole::User)
            .await
    };
    match seeded.await {
        Ok(profile) => profile,
        Err(e) => panic!("failed to seed profile: {e}"),
    }
}

/// Chunk of document `id` with a URL in its metadata
#[must_use]
pub fn chunk(id: &str) -> ScoredChunk {
    let mut metadata = Map::new();
    metadata.insert("source_url".to_owned(), json!(format!("https://docs.example/{id}")));
    metadata.insert("source_type".to_owned(), json!("google_drive"));
    ScoredChunk {
        document_id: id.to_owned(),
        document_name: format!("{id}.pdf"),
        text: format!("Passage from {id}"),
        score: 0.8,
        metadata,
    }
}

/// The source [`chunk`] projects to
#[must_use]
pub fn source(id: &str) -> Source {
    chunk(id).to_source()
}

/// Configuration for an in-memory deployment with short timeouts
#[must_use]
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_owned(),
        http_port: 0,
        environment: Environment::Testing,
        log_level: LogLevel::Debug,
        database: DatabaseUrl::Memory,
        cors_origins: vec!["*".to_owned()],
        llm: LlmConfig {
            request_timeout: Duration::from_secs(5),
            ..LlmConfig::default()
        },
        retrieval: RetrievalConfig {
            base_url: "http://127.0.0.1:9".to_owned(),
            api_key: None,
            timeout: Duration::from_secs(1),
            depth_top_k: 6,
            breadth_top_k: 100,
        },
        slack: SlackConfig {
            signing_secret: Some("test-signing-secret".to_owned()),
            api_base_url: "http://127.0.0.1:9".to_owned(),
            thinking_emoji: "thinking_face".to_owned(),
            gate_model: "gpt-4o-mini".to_owned(),
            gate_timeout: Duration::from_millis(500),
            signature_tolerance: Duration::from_secs(300),
        },
        chat: ChatConfig {
            fallback_message: "Sorry, something went wrong.".to_owned(),
            title_model: "gpt-4o-mini".to_owned(),
            history_window: 20,
        },
    }
}

// ============================================================================
// Scripted model provider
// ============================================================================

/// What the scripted provider does for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Return this text (one chunk when streaming)
    Text(String),
    /// Stream these deltas (concatenated when not streaming)
    Chunks(Vec<String>),
    /// Fail with an external service error
    Fail(String),
    /// Never answer
    Hang,
    /// Stream these deltas, then never finish
    HangAfter(Vec<String>),
}

type Responder = dyn Fn(&ChatRequest) -> ScriptedReply + Send + Sync;

/// Provider whose answers come from a closure, recording every request
pub struct ScriptedProvider {
    responder: Box<Responder>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    /// Answer every request with `text`
    #[must_use]
    pub fn always(text: &str) -> Self {
        let text = text.to_owned();
        Self::from_fn(move |_| ScriptedReply::Text(text.clone()))
    }

    /// Answer with `responder`
    #[must_use]
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next(&self, request: &ChatRequest) -> ScriptedReply {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.responder)(request)
    }
}

fn delta(text: String) -> Result<StreamChunk, AppError> {
    Ok(StreamChunk {
        delta: text,
        is_final: false,
        finish_reason: None,
    })
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
            | LlmCapabilities::JSON_MODE
            | LlmCapabilities::STRUCTURED_OUTPUT
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let content = match self.next(request) {
            ScriptedReply::Text(text) => text,
            ScriptedReply::Chunks(chunks) => chunks.concat(),
            ScriptedReply::Fail(message) => {
                return Err(AppError::external_service("scripted", message))
            }
            ScriptedReply::Hang | ScriptedReply::HangAfter(_) => {
                std::future::pending::<()>().await;
                String::new()
            }
        };
        Ok(ChatResponse {
            content,
            model: request.model.clone(),
            usage: None,
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let stream: ChatStream = match self.next(request) {
            ScriptedReply::Text(text) => Box::pin(tokio_stream::iter(vec![delta(text)])),
            ScriptedReply::Chunks(chunks) => {
                Box::pin(tokio_stream::iter(chunks.into_iter().map(delta).collect::<Vec<_>>()))
            }
            ScriptedReply::Fail(message) => {
                return Err(AppError::external_service("scripted", message))
            }
            ScriptedReply::Hang => Box::pin(tokio_stream::pending()),
            ScriptedReply::HangAfter(chunks) => Box::pin(
                tokio_stream::iter(chunks.into_iter().map(delta).collect::<Vec<_>>())
                    .chain(tokio_stream::pending()),
            ),
        };
        Ok(stream)
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

// ============================================================================
// Static retriever
// ============================================================================

/// Retriever returning fixed chunks, or always failing
pub struct StaticRetriever {
    chunks: Option<Vec<ScoredChunk>>,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    /// Always return `chunks`
    #[must_use]
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self {
            chunks: Some(chunks),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with `RetrievalUnavailable`
    #[must_use]
    pub fn failing() -> Self {
        Self {
            chunks: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries received so far
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        _tenant: &Tenant,
        query: &str,
        _options: &SearchOptions,
    ) -> AppResult<Vec<ScoredChunk>> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_owned());
        self.chunks
            .clone()
            .ok_or_else(|| AppError::retrieval_unavailable("search backend is down"))
    }
}

// ============================================================================
// Recording Slack client
// ============================================================================

/// A Web API call made through [`RecordingSlack`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackCall {
    /// `reactions.add`
    AddReaction {
        /// Channel id
        channel: String,
        /// Message timestamp
        ts: String,
        /// Emoji name
        name: String,
    },
    /// `reactions.remove`
    RemoveReaction {
        /// Channel id
        channel: String,
        /// Message timestamp
        ts: String,
        /// Emoji name
        name: String,
    },
    /// `chat.postMessage`
    Post(SlackPost),
}

/// Slack client that records calls instead of sending them
#[derive(Default)]
pub struct RecordingSlack {
    calls: Mutex<Vec<SlackCall>>,
    fail_posts: bool,
}

impl RecordingSlack {
    /// Recorder accepting every call
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder whose `chat.postMessage` calls fail
    #[must_use]
    pub fn failing_posts() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_posts: true,
        }
    }

    /// Every call in order
    #[must_use]
    pub fn calls(&self) -> Vec<SlackCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the posted messages
    #[must_use]
    pub fn posts(&self) -> Vec<SlackPost> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SlackCall::Post(post) => Some(post),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SlackCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl SlackApi for RecordingSlack {
    async fn post_message(&self, _token: &str, post: &SlackPost) -> AppResult<()> {
        self.record(SlackCall::Post(post.clone()));
        if self.fail_posts {
            return Err(AppError::external_service("slack", "chat.postMessage: channel_not_found"));
        }
        Ok(())
    }

    async fn add_reaction(&self, _token: &str, channel: &str, ts: &str, name: &str) -> AppResult<()> {
        self.record(SlackCall::AddReaction {
            channel: channel.to_owned(),
            ts: ts.to_owned(),
            name: name.to_owned(),
        });
        Ok(())
    }

    async fn remove_reaction(
        &self,
        _token: &str,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> AppResult<()> {
        self.record(SlackCall::RemoveReaction {
            channel: channel.to_owned(),
            ts: ts.to_owned(),
            name: name.to_owned(),
        });
        Ok(())
    }
}
