// ABOUTME: Conversation orchestration binding tenant, conversation, retrieval and generation
// ABOUTME: Web and widget turns stream through the caller; Slack turns run both qualification gates
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Conversation Context
//!
//! Every surface prepares a turn through [`ConversationContext::prompt`], so
//! the source list the model sees is built by the same routine on the web,
//! widget and Slack paths.
//!
//! The Slack path runs the pre-gate before anything is stored. A reply that
//! fails the post-gate has its placeholder removed, leaving only the user's
//! message in the thread history.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::gates::{GateDecision, QualificationGates, SkipReason};
use super::identity::slack_sign_in;
use super::reply_generator::{FinalReply, ReplyGenerator, ReplyState};
use super::titles::{fallback_title, TitleGenerator};
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::ModelAdapter;
use crate::models::{
    Conversation, Message, NewMessage, Profile, SearchOptions, SearchOverrides, Tenant,
};
use crate::prompt::{PromptAssembler, ReplyContext};
use crate::retrieval::Retriever;
use crate::slack::{format_reply, InboundMessage, SlackApi, SlackPost};

/// A prepared turn, ready for the reply generator
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTurn {
    /// The persisted user message
    pub user_message: Message,
    /// Prompt and citation candidates
    pub reply_context: ReplyContext,
    /// Resolved model id
    pub model: String,
    /// Resolved search flags
    pub search_options: SearchOptions,
}

/// Result of handling a Slack channel message
#[derive(Debug, Clone, PartialEq)]
pub enum SlackOutcome {
    /// The pre-gate declined; nothing was stored
    Skipped(SkipReason),
    /// A reply was generated but not posted
    Suppressed {
        /// Conversation holding the user message
        conversation_id: Uuid,
        /// Why the reply was held back
        reason: SkipReason,
    },
    /// The reply was posted in the thread
    Posted(FinalReply),
}

/// Shared collaborators for conversation turns
#[derive(Clone)]
pub struct ChatEngine {
    database: Database,
    retriever: Arc<dyn Retriever>,
    adapter: ModelAdapter,
    assembler: PromptAssembler,
    generator: ReplyGenerator,
    gates: QualificationGates,
    titles: TitleGenerator,
    thinking_emoji: String,
}

impl ChatEngine {
    /// Wire the engine from configuration
    #[must_use]
    pub fn new(
        database: Database,
        retriever: Arc<dyn Retriever>,
        adapter: ModelAdapter,
        config: &ServerConfig,
    ) -> Self {
        Self {
            generator: ReplyGenerator::new(
                database.clone(),
                adapter.clone(),
                config.chat.fallback_message.clone(),
            ),
            gates: QualificationGates::new(
                adapter.clone(),
                config.slack.gate_model.clone(),
                config.slack.gate_timeout,
            ),
            titles: TitleGenerator::new(adapter.clone(), config.chat.title_model.clone()),
            assembler: PromptAssembler::new(config.chat.history_window),
            thinking_emoji: config.slack.thinking_emoji.clone(),
            database,
            retriever,
            adapter,
        }
    }

    /// Persistence handle
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// Reply generator
    #[must_use]
    pub const fn generator(&self) -> &ReplyGenerator {
        &self.generator
    }

    /// Model adapter
    #[must_use]
    pub const fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }

    /// Bind a conversation for turns
    #[must_use]
    pub fn context(&self, tenant: Tenant, conversation: Conversation) -> ConversationContext {
        ConversationContext {
            database: self.database.clone(),
            retriever: Arc::clone(&self.retriever),
            adapter: self.adapter.clone(),
            assembler: self.assembler,
            tenant,
            conversation,
        }
    }

    /// Create a conversation titled from its first message
    ///
    /// # Errors
    ///
    /// Returns an error if the profile belongs to another tenant or the
    /// insert fails
    pub async fn start_conversation(
        &self,
        tenant: &Tenant,
        profile: &Profile,
        first_message: &str,
        slack_thread_key: Option<&str>,
    ) -> AppResult<Conversation> {
        if profile.tenant_id != tenant.id {
            return Err(AppError::permission_denied("Profile does not belong to tenant"));
        }
        self.database
            .create_conversation(
                tenant.id,
                profile.id,
                &fallback_title(first_message),
                slack_thread_key,
            )
            .await
    }

    /// Open a profile's own conversation
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the conversation does not exist in the tenant or
    /// belongs to another profile
    pub async fn open(
        &self,
        tenant: &Tenant,
        profile: &Profile,
        conversation_id: Uuid,
    ) -> AppResult<ConversationContext> {
        let conversation = self
            .database
            .get_conversation(tenant.id, conversation_id)
            .await?
            .filter(|c| c.profile_id == profile.id)
            .ok_or_else(|| AppError::not_found("Conversation"))?;
        Ok(self.context(tenant.clone(), conversation))
    }

    /// Replace the provisional title with a model-generated one
    ///
    /// # Errors
    ///
    /// Returns an error if the title update fails
    pub async fn name_conversation(
        &self,
        tenant: &Tenant,
        conversation_id: Uuid,
        first_message: &str,
    ) -> AppResult<String> {
        let title = self.titles.generate(first_message).await;
        self.database
            .update_conversation_title(tenant.id, conversation_id, &title)
            .await?;
        Ok(title)
    }

    /// Handle a Slack channel message end to end
    ///
    /// The thinking reaction is removed whatever the outcome once it has
    /// been added.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTenant` for an uninstalled team, or retrieval,
    /// database and Slack API errors
    #[instrument(
        skip_all,
        fields(team_id = %inbound.team_id, channel = %inbound.channel, ts = %inbound.ts)
    )]
    pub async fn prompt_from_message_event(
        &self,
        inbound: &InboundMessage,
        slack: &dyn SlackApi,
    ) -> AppResult<SlackOutcome> {
        let (tenant, profile) = slack_sign_in(&self.database, &inbound.team_id, &inbound.user).await?;
        let installation = tenant
            .slack
            .clone()
            .ok_or_else(|| AppError::unknown_tenant(&inbound.team_id))?;

        let mode = installation.channel_mode(&inbound.channel);
        if let GateDecision::Skip(reason) = self
            .gates
            .should_reply_to_message(&inbound.text, mode, inbound.mentioned)
            .await
        {
            info!(%reason, "Message did not pass the reply gate");
            return Ok(SlackOutcome::Skipped(reason));
        }

        let token = installation.bot_token.as_str();
        if let Err(e) = slack
            .add_reaction(token, &inbound.channel, &inbound.ts, &self.thinking_emoji)
            .await
        {
            warn!(error = %e, "Failed to add thinking reaction");
        }

        let outcome = self.answer_in_thread(&tenant, &profile, inbound, slack, token).await;

        if let Err(e) = slack
            .remove_reaction(token, &inbound.channel, &inbound.ts, &self.thinking_emoji)
            .await
        {
            warn!(error = %e, "Failed to remove thinking reaction");
        }
        outcome
    }

    async fn answer_in_thread(
        &self,
        tenant: &Tenant,
        profile: &Profile,
        inbound: &InboundMessage,
        slack: &dyn SlackApi,
        token: &str,
    ) -> AppResult<SlackOutcome> {
        let conversation = self.thread_conversation(tenant, profile, inbound).await?;
        let conversation_id = conversation.id;
        let context = self.context(tenant.clone(), conversation);

        let turn = context
            .prompt(profile, &inbound.text, &SearchOverrides::default(), None)
            .await?;

        let pending = self
            .generator
            .begin(tenant, conversation_id, &turn.model, turn.search_options)
            .await?;
        let draft = self
            .generator
            .generate(tenant, pending, &turn.reply_context, |_| {}, &CancellationToken::new())
            .await;

        if draft.state() == ReplyState::Failed {
            self.generator.finalize(draft).await?;
            return Ok(SlackOutcome::Suppressed {
                conversation_id,
                reason: SkipReason::GenerationFailed,
            });
        }

        let answer = draft.message().unwrap_or_default().to_owned();
        if let GateDecision::Skip(reason) = self
            .gates
            .is_answered(&inbound.text, &answer, draft.sources().len())
            .await
        {
            info!(%reason, "Reply held back by the post gate");
            self.generator.discard(draft).await?;
            return Ok(SlackOutcome::Suppressed {
                conversation_id,
                reason,
            });
        }

        let reply = self.generator.finalize(draft).await?;
        slack
            .post_message(
                token,
                &SlackPost {
                    channel: inbound.channel.clone(),
                    thread_ts: Some(inbound.thread_ts.clone()),
                    text: format_reply(&reply.content, &reply.sources),
                },
            )
            .await?;
        info!(message_id = %reply.message_id, "Reply posted to Slack thread");
        Ok(SlackOutcome::Posted(reply))
    }

    /// Conversation for a Slack thread, created on its first message
    async fn thread_conversation(
        &self,
        tenant: &Tenant,
        profile: &Profile,
        inbound: &InboundMessage,
    ) -> AppResult<Conversation> {
        let key = inbound.thread_key();
        if let Some(existing) = self
            .database
            .find_conversation_by_slack_thread(tenant.id, &key)
            .await?
        {
            return Ok(existing);
        }

        match self
            .start_conversation(tenant, profile, &inbound.text, Some(&key))
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if e.code == ErrorCode::ResourceConflict => {
                debug!(thread = %key, "Thread conversation created concurrently");
                self.database
                    .find_conversation_by_slack_thread(tenant.id, &key)
                    .await?
                    .ok_or_else(|| AppError::not_found("Conversation"))
            }
            Err(e) => Err(e),
        }
    }
}

/// A tenant and conversation bound to retrieval and prompt assembly
#[derive(Clone)]
pub struct ConversationContext {
    database: Database,
    retriever: Arc<dyn Retriever>,
    adapter: ModelAdapter,
    assembler: PromptAssembler,
    tenant: Tenant,
    conversation: Conversation,
}

impl ConversationContext {
    /// Bound tenant
    #[must_use]
    pub const fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Bound conversation
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Store the user's message, retrieve and assemble the prompt
    ///
    /// A disabled requested model falls back to the tenant default. Search
    /// overrides apply only where the tenant permits them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty content or an unknown model,
    /// `PermissionDenied` for a profile of another tenant, and
    /// `RetrievalUnavailable` when retrieval fails (no assistant row exists
    /// at that point)
    #[instrument(
        skip_all,
        fields(tenant_id = %self.tenant.id, conversation_id = %self.conversation.id)
    )]
    pub async fn prompt(
        &self,
        profile: &Profile,
        content: &str,
        overrides: &SearchOverrides,
        requested_model: Option<&str>,
    ) -> AppResult<PreparedTurn> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::invalid_input("Message content is empty"));
        }
        if profile.tenant_id != self.tenant.id {
            return Err(AppError::permission_denied("Profile does not belong to tenant"));
        }

        let model = self
            .adapter
            .registry()
            .resolve_for_tenant(&self.tenant, requested_model)?
            .id
            .clone();
        let search_options = self.tenant.search.resolve(overrides);

        let user_message = self
            .database
            .create_message(&NewMessage::user(self.tenant.id, self.conversation.id, content))
            .await?;

        let chunks = self
            .retriever
            .retrieve(&self.tenant, content, &search_options)
            .await?;
        debug!(chunks = chunks.len(), "Retrieved grounding chunks");

        let history = self
            .database
            .get_messages_for_conversation(self.tenant.id, self.conversation.id)
            .await?;
        let reply_context = self.assembler.assemble(&self.tenant, &history, &chunks);

        Ok(PreparedTurn {
            user_message,
            reply_context,
            model,
            search_options,
        })
    }
}
