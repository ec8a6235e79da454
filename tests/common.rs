// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Builds server resources over scripted models, a static retriever and a recording Slack client
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors
#![allow(
    dead_code,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `base_chat`

use std::sync::{Arc, Once};
use std::time::Duration;

use base_chat::{
    config::ServerConfig,
    database::Database,
    llm::{
        prompts::{IS_ANSWERED_PROMPT, IS_QUESTION_PROMPT, TITLE_PROMPT},
        ChatRequest, LlmProvider, ModelAdapter, ModelRegistry, ProviderKind,
    },
    models::{MessageRole, Profile, Tenant},
    resources::ServerResources,
    retrieval::{Retriever, ScoredChunk},
    server::ChatServer,
    slack::{SignatureVerifier, SlackApi},
    test_utils::{
        seed_profile, test_config, test_tenant, with_slack, RecordingSlack, ScriptedProvider,
        ScriptedReply, StaticRetriever,
    },
};

static INIT_LOGGER: Once = Once::new();

/// Slack workspace installed on the test tenant
pub const TEAM_ID: &str = "T0ACME";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Structured reply body as a provider would stream it
pub fn reply_json(message: &str, used_source_indexes: &[i64]) -> String {
    serde_json::json!({
        "message": message,
        "usedSourceIndexes": used_source_indexes,
    })
    .to_string()
}

/// Which call a scripted request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    IsQuestion,
    IsAnswered,
    Title,
    Reply,
}

/// Classify a request by its system prompt
pub fn call_kind(request: &ChatRequest) -> CallKind {
    let system = request
        .messages
        .iter()
        .find(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    if system.starts_with(IS_QUESTION_PROMPT) {
        CallKind::IsQuestion
    } else if system.starts_with(IS_ANSWERED_PROMPT) {
        CallKind::IsAnswered
    } else if system.starts_with(TITLE_PROMPT) {
        CallKind::Title
    } else {
        CallKind::Reply
    }
}

/// Scripted answers for each kind of model call
#[derive(Debug, Clone)]
pub struct Script {
    pub reply: ScriptedReply,
    pub is_question: bool,
    pub is_answered: bool,
    pub title: String,
}

impl Script {
    /// Reply with `message` citing `indexes`; both gates pass
    pub fn answering(message: &str, indexes: &[i64]) -> Self {
        Self {
            reply: ScriptedReply::Text(reply_json(message, indexes)),
            is_question: true,
            is_answered: true,
            title: "Refund policy".to_owned(),
        }
    }

    /// Replace the generation behavior
    pub fn with_reply(mut self, reply: ScriptedReply) -> Self {
        self.reply = reply;
        self
    }

    /// Set the pre-gate verdict
    pub const fn question(mut self, is_question: bool) -> Self {
        self.is_question = is_question;
        self
    }

    /// Set the post-gate verdict
    pub const fn answered(mut self, is_answered: bool) -> Self {
        self.is_answered = is_answered;
        self
    }

    /// Provider answering per this script
    pub fn provider(self) -> ScriptedProvider {
        ScriptedProvider::from_fn(move |request| match call_kind(request) {
            CallKind::IsQuestion => ScriptedReply::Text(
                serde_json::json!({ "isQuestion": self.is_question }).to_string(),
            ),
            CallKind::IsAnswered => ScriptedReply::Text(
                serde_json::json!({ "isAnswered": self.is_answered }).to_string(),
            ),
            CallKind::Title => {
                ScriptedReply::Text(serde_json::json!({ "title": self.title }).to_string())
            }
            CallKind::Reply => self.reply.clone(),
        })
    }
}

/// A fully wired application over test doubles
pub struct TestApp {
    pub resources: Arc<ServerResources>,
    pub provider: Arc<ScriptedProvider>,
    pub retriever: Arc<StaticRetriever>,
    pub slack: Arc<RecordingSlack>,
    pub tenant: Tenant,
    pub profile: Profile,
}

impl TestApp {
    /// In-memory app with a Slack-connected tenant and one web profile
    pub async fn new(script: Script, chunks: Vec<ScoredChunk>) -> Self {
        let database = Database::new("sqlite::memory:").await.unwrap();
        Self::with_database(database, script, chunks).await
    }

    /// App over an existing database
    pub async fn with_database(database: Database, script: Script, chunks: Vec<ScoredChunk>) -> Self {
        Self::build(database, script.provider(), StaticRetriever::new(chunks), RecordingSlack::new())
            .await
    }

    /// App with every collaborator supplied
    pub async fn build(
        database: Database,
        provider: ScriptedProvider,
        retriever: StaticRetriever,
        slack: RecordingSlack,
    ) -> Self {
        init_test_logging();

        let tenant = with_slack(test_tenant("Acme Co."), TEAM_ID);
        database.create_tenant(&tenant).await.unwrap();
        let profile = seed_profile(&database, &tenant, "web-user-1").await;

        let provider = Arc::new(provider);
        let retriever = Arc::new(retriever);
        let slack = Arc::new(slack);
        let adapter = ModelAdapter::new(ModelRegistry::with_defaults()).with_provider(
            ProviderKind::OpenAi,
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
        );

        let resources = Arc::new(ServerResources::new(
            Arc::new(config()),
            database,
            Arc::clone(&retriever) as Arc<dyn Retriever>,
            adapter,
            Arc::clone(&slack) as Arc<dyn SlackApi>,
        ));

        Self {
            resources,
            provider,
            retriever,
            slack,
            tenant,
            profile,
        }
    }

    /// Full router with middleware
    pub fn router(&self) -> axum::Router {
        ChatServer::new(Arc::clone(&self.resources)).router()
    }

    /// Persistence handle
    pub fn database(&self) -> &Database {
        &self.resources.database
    }

    /// Requests that generated replies, excluding gates and titles
    pub fn reply_requests(&self) -> Vec<ChatRequest> {
        self.provider
            .requests()
            .into_iter()
            .filter(|r| call_kind(r) == CallKind::Reply)
            .collect()
    }

    /// Sign a Slack webhook body with the test secret
    pub fn slack_signature(&self, timestamp: i64, body: &[u8]) -> String {
        let secret = config().slack.signing_secret.unwrap();
        SignatureVerifier::new(&secret, Duration::from_secs(300)).sign(timestamp, body)
    }
}

/// Test configuration
pub fn config() -> ServerConfig {
    test_config()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
