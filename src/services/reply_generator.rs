// ABOUTME: Drives one assistant turn from placeholder row to a single final write
// ABOUTME: Failures, empty output and cancellation finalize the row with the fallback text
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Reply Generation
//!
//! A turn moves through `PendingPlaceholder -> Generating -> Finalized`, or
//! `Generating -> Failed` when the model cannot produce a reply. The
//! placeholder row is inserted first so its id can be handed to the client
//! before any content exists. Partial replies go to the caller only; the
//! store sees exactly one content write per row.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::citations::reconcile_sources;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::llm::{ModelAdapter, PartialReply};
use crate::models::{Message, NewMessage, SearchOptions, Source, Tenant};
use crate::prompt::ReplyContext;

/// Position of a turn in the reply state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Placeholder row inserted, generation not started
    PendingPlaceholder,
    /// Model output received, not yet written
    Generating,
    /// Real content written
    Finalized,
    /// Fallback content written, or generation failed before writing
    Failed,
}

impl ReplyState {
    /// Whether the row content has been decided
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }
}

/// A placeholder waiting for generation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReply {
    /// The persisted placeholder row
    pub placeholder: Message,
    /// Logical model id used for generation
    pub model: String,
}

impl PendingReply {
    /// Id to hand to clients before content exists
    #[must_use]
    pub const fn message_id(&self) -> Uuid {
        self.placeholder.id
    }

    /// Always `PendingPlaceholder`
    #[must_use]
    pub const fn state(&self) -> ReplyState {
        ReplyState::PendingPlaceholder
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DraftOutcome {
    Generated {
        message: String,
        sources: Vec<Source>,
        used_source_indexes: Vec<i64>,
    },
    Failed {
        reason: String,
        cancelled: bool,
    },
}

/// Model output for a placeholder, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyDraft {
    pending: PendingReply,
    outcome: DraftOutcome,
}

impl ReplyDraft {
    /// `Generating` with usable output, `Failed` otherwise
    #[must_use]
    pub const fn state(&self) -> ReplyState {
        match self.outcome {
            DraftOutcome::Generated { .. } => ReplyState::Generating,
            DraftOutcome::Failed { .. } => ReplyState::Failed,
        }
    }

    /// Placeholder id
    #[must_use]
    pub const fn message_id(&self) -> Uuid {
        self.pending.placeholder.id
    }

    /// Generated text, if any
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            DraftOutcome::Generated { message, .. } => Some(message),
            DraftOutcome::Failed { .. } => None,
        }
    }

    /// Reconciled citations in prompt order
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        match &self.outcome {
            DraftOutcome::Generated { sources, .. } => sources,
            DraftOutcome::Failed { .. } => &[],
        }
    }

    /// Indexes exactly as the model returned them
    #[must_use]
    pub fn used_source_indexes(&self) -> &[i64] {
        match &self.outcome {
            DraftOutcome::Generated {
                used_source_indexes,
                ..
            } => used_source_indexes,
            DraftOutcome::Failed { .. } => &[],
        }
    }

    /// Why generation failed
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            DraftOutcome::Generated { .. } => None,
            DraftOutcome::Failed { reason, .. } => Some(reason),
        }
    }

    /// Whether generation stopped because the caller went away
    #[must_use]
    pub const fn was_cancelled(&self) -> bool {
        matches!(self.outcome, DraftOutcome::Failed { cancelled: true, .. })
    }
}

/// A finalized assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct FinalReply {
    /// Message id
    pub message_id: Uuid,
    /// Conversation id
    pub conversation_id: Uuid,
    /// `Finalized` or `Failed`
    pub state: ReplyState,
    /// Persisted content
    pub content: String,
    /// Persisted sources
    pub sources: Vec<Source>,
}

/// Creates placeholders and finalizes them once
#[derive(Clone)]
pub struct ReplyGenerator {
    database: Database,
    adapter: ModelAdapter,
    fallback_message: String,
}

impl ReplyGenerator {
    /// Create a generator
    #[must_use]
    pub fn new(database: Database, adapter: ModelAdapter, fallback_message: impl Into<String>) -> Self {
        Self {
            database,
            adapter,
            fallback_message: fallback_message.into(),
        }
    }

    /// Content written when a turn fails
    #[must_use]
    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    /// Insert the assistant placeholder for a turn
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn begin(
        &self,
        tenant: &Tenant,
        conversation_id: Uuid,
        model: &str,
        search_options: SearchOptions,
    ) -> AppResult<PendingReply> {
        let placeholder = self
            .database
            .create_message(&NewMessage::assistant_placeholder(
                tenant.id,
                conversation_id,
                model,
                search_options,
            ))
            .await?;
        debug!(message_id = %placeholder.id, %conversation_id, "Inserted assistant placeholder");
        Ok(PendingReply {
            placeholder,
            model: model.to_owned(),
        })
    }

    /// Run the model without touching the store
    ///
    /// Never fails: provider errors, empty output and cancellation produce a
    /// failed draft.
    #[instrument(
        skip_all,
        fields(
            tenant_id = %tenant.id,
            message_id = %pending.placeholder.id,
            model = %pending.model,
        )
    )]
    pub async fn generate<F>(
        &self,
        tenant: &Tenant,
        pending: PendingReply,
        context: &ReplyContext,
        on_partial: F,
        cancel: &CancellationToken,
    ) -> ReplyDraft
    where
        F: FnMut(PartialReply) + Send,
    {
        let generation = async {
            let handle = self
                .adapter
                .generate(tenant, &context.messages, &pending.model)
                .await?;
            handle.drive(on_partial).await
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::cancelled("Client disconnected during generation")),
            result = generation => result,
        };

        let outcome = match result {
            Ok(reply) if !reply.message.trim().is_empty() => {
                let sources = reconcile_sources(&context.sources, &reply.used_source_indexes);
                DraftOutcome::Generated {
                    message: reply.message,
                    sources,
                    used_source_indexes: reply.used_source_indexes,
                }
            }
            Ok(_) => {
                warn!("Model returned an empty reply");
                DraftOutcome::Failed {
                    reason: "empty reply".to_owned(),
                    cancelled: false,
                }
            }
            Err(e) => {
                let cancelled = e.is_cancelled();
                if cancelled {
                    info!("Generation cancelled");
                } else {
                    warn!(error = %e, "Generation failed");
                }
                DraftOutcome::Failed {
                    reason: e.to_string(),
                    cancelled,
                }
            }
        };

        ReplyDraft { pending, outcome }
    }

    /// Write the draft into its placeholder, or the fallback for a failed draft
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder was already finalized or the
    /// write fails
    pub async fn finalize(&self, draft: ReplyDraft) -> AppResult<FinalReply> {
        let placeholder = &draft.pending.placeholder;
        let (state, content, sources) = match draft.outcome {
            DraftOutcome::Generated {
                message, sources, ..
            } => (ReplyState::Finalized, message, sources),
            DraftOutcome::Failed { .. } => {
                (ReplyState::Failed, self.fallback_message.clone(), Vec::new())
            }
        };

        self.database
            .update_message_content(
                placeholder.tenant_id,
                placeholder.conversation_id,
                placeholder.id,
                &content,
                Some(&sources),
            )
            .await?;

        info!(
            message_id = %placeholder.id,
            state = ?state,
            sources = sources.len(),
            "Assistant message finalized"
        );

        Ok(FinalReply {
            message_id: placeholder.id,
            conversation_id: placeholder.conversation_id,
            state,
            content,
            sources,
        })
    }

    /// Remove the placeholder of a reply that will not be delivered
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder is no longer open
    pub async fn discard(&self, draft: ReplyDraft) -> AppResult<()> {
        let placeholder = &draft.pending.placeholder;
        self.database
            .discard_message(placeholder.tenant_id, placeholder.conversation_id, placeholder.id)
            .await?;
        debug!(message_id = %placeholder.id, "Discarded undelivered reply");
        Ok(())
    }

    /// Generate and finalize in one step
    ///
    /// # Errors
    ///
    /// Returns an error only if the final write fails
    pub async fn run<F>(
        &self,
        tenant: &Tenant,
        pending: PendingReply,
        context: &ReplyContext,
        on_partial: F,
        cancel: &CancellationToken,
    ) -> AppResult<FinalReply>
    where
        F: FnMut(PartialReply) + Send,
    {
        let draft = self.generate(tenant, pending, context, on_partial, cancel).await;
        self.finalize(draft).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ModelRegistry, ProviderKind};
    use crate::test_utils::{
        seed_profile, source, test_tenant, ScriptedProvider, ScriptedReply,
    };
    use std::sync::Arc;

    async fn setup(provider: ScriptedProvider) -> (ReplyGenerator, Database, Tenant, Uuid) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let tenant = test_tenant("Acme Co.");
        db.create_tenant(&tenant).await.unwrap();
        let profile = seed_profile(&db, &tenant, "u-1").await;
        let conv = db
            .create_conversation(tenant.id, profile.id, "t", None)
            .await
            .unwrap();
        let adapter = ModelAdapter::new(ModelRegistry::with_defaults())
            .with_provider(ProviderKind::OpenAi, Arc::new(provider));
        (ReplyGenerator::new(db.clone(), adapter, "fallback"), db, tenant, conv.id)
    }

    fn context() -> ReplyContext {
        ReplyContext {
            messages: vec![ChatMessage::system("s"), ChatMessage::user("q")],
            sources: vec![source("a"), source("b")],
        }
    }

    #[tokio::test]
    async fn test_successful_turn_writes_reconciled_sources() {
        let (generator, db, tenant, conv) = setup(ScriptedProvider::always(
            r#"{"message":"Answer","usedSourceIndexes":[1,7]}"#,
        ))
        .await;

        let pending = generator
            .begin(&tenant, conv, "gpt-4o", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(pending.state(), ReplyState::PendingPlaceholder);
        let id = pending.message_id();

        let reply = generator
            .run(&tenant, pending, &context(), |_| {}, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.state, ReplyState::Finalized);
        assert_eq!(reply.sources, vec![source("b")]);

        let stored = db.get_message(tenant.id, id).await.unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("Answer"));
        assert_eq!(stored.sources, vec![source("b")]);
    }

    #[tokio::test]
    async fn test_provider_failure_writes_fallback() {
        let (generator, db, tenant, conv) =
            setup(ScriptedProvider::from_fn(|_| ScriptedReply::Fail("boom".to_owned()))).await;
        let pending = generator
            .begin(&tenant, conv, "gpt-4o", SearchOptions::default())
            .await
            .unwrap();
        let id = pending.message_id();

        let reply = generator
            .run(&tenant, pending, &context(), |_| {}, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.state, ReplyState::Failed);
        assert!(reply.state.is_terminal());

        let stored = db.get_message(tenant.id, id).await.unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("fallback"));
        assert!(stored.sources.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_is_finalized_with_fallback() {
        let (generator, db, tenant, conv) = setup(ScriptedProvider::from_fn(|_| {
            ScriptedReply::HangAfter(vec![r#"{"message":"par"#.to_owned()])
        }))
        .await;
        let pending = generator
            .begin(&tenant, conv, "gpt-4o", SearchOptions::default())
            .await
            .unwrap();
        let id = pending.message_id();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let draft = generator
            .generate(
                &tenant,
                pending,
                &context(),
                move |partial| {
                    assert_eq!(partial.message, "par");
                    trigger.cancel();
                },
                &cancel,
            )
            .await;
        assert!(draft.was_cancelled());
        assert_eq!(draft.state(), ReplyState::Failed);

        generator.finalize(draft).await.unwrap();
        let stored = db.get_message(tenant.id, id).await.unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_a_failure() {
        let (generator, _db, tenant, conv) =
            setup(ScriptedProvider::always(r#"{"message":"  ","usedSourceIndexes":[0]}"#)).await;
        let pending = generator
            .begin(&tenant, conv, "gpt-4o", SearchOptions::default())
            .await
            .unwrap();
        let draft = generator
            .generate(&tenant, pending, &context(), |_| {}, &CancellationToken::new())
            .await;
        assert_eq!(draft.failure(), Some("empty reply"));
        assert!(draft.sources().is_empty());
    }

    #[tokio::test]
    async fn test_discarded_draft_leaves_no_row() {
        let (generator, db, tenant, conv) = setup(ScriptedProvider::always(
            r#"{"message":"Hi","usedSourceIndexes":[]}"#,
        ))
        .await;
        let pending = generator
            .begin(&tenant, conv, "gpt-4o", SearchOptions::default())
            .await
            .unwrap();
        let draft = generator
            .generate(&tenant, pending, &context(), |_| {}, &CancellationToken::new())
            .await;
        assert_eq!(draft.message(), Some("Hi"));

        generator.discard(draft).await.unwrap();
        assert!(db
            .get_messages_for_conversation(tenant.id, conv)
            .await
            .unwrap()
            .is_empty());
    }
}
