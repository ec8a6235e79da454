// ABOUTME: Web chat route handlers for conversations and streamed assistant replies
// ABOUTME: Replies stream as SSE with the assistant message id in an x-message-id header
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Chat routes for the web client
//!
//! Authentication happens upstream; the trusted `x-tenant-id` and
//! `x-profile-id` headers identify the caller. The assistant message id is
//! sent as a response header before the first event so the client can
//! correlate the stream with the stored message.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{with_id_header, CONVERSATION_ID_HEADER, MESSAGE_ID_HEADER};
use crate::errors::AppError;
use crate::llm::PartialReply;
use crate::models::{Message, Profile, SearchOverrides, Source, Tenant, TenantId};
use crate::resources::ServerResources;
use crate::services::{ConversationContext, FinalReply, ReplyState};

/// Trusted header naming the caller's tenant
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Trusted header naming the caller's profile
pub const PROFILE_HEADER: &str = "x-profile-id";

/// Partial events buffered before the slowest client starts losing them
const PARTIAL_BUFFER: usize = 32;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A user message for a new or existing conversation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Message content
    pub content: String,
    /// Requested model; disabled models fall back to the tenant default
    #[serde(default)]
    pub model: Option<String>,
    /// Requested search flags
    #[serde(default)]
    pub search: SearchOverrides,
}

/// Ordered conversation history
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    /// Conversation id
    pub conversation_id: Uuid,
    /// Messages in insertion order
    pub messages: Vec<Message>,
}

/// Payload of the terminal `done` event
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneEvent {
    /// Assistant message id
    pub message_id: Uuid,
    /// Conversation id
    pub conversation_id: Uuid,
    /// Final content, the fallback message when generation failed
    pub message: String,
    /// Cited sources in prompt order
    pub sources: Vec<Source>,
    /// True when the fallback message was stored
    pub failed: bool,
}

impl From<FinalReply> for DoneEvent {
    fn from(reply: FinalReply) -> Self {
        Self {
            message_id: reply.message_id,
            conversation_id: reply.conversation_id,
            message: reply.content,
            sources: reply.sources,
            failed: reply.state == ReplyState::Failed,
        }
    }
}

/// Items forwarded from the generation task to the SSE stream
enum TurnEvent {
    Partial(String),
    Done(FinalReply),
    Error(String),
}

impl TurnEvent {
    const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Partial(_))
    }

    fn into_sse(self) -> Event {
        let (name, data) = match self {
            Self::Partial(message) => ("partial", serde_json::json!({ "message": message })),
            Self::Done(reply) => (
                "done",
                serde_json::to_value(DoneEvent::from(reply)).unwrap_or_default(),
            ),
            Self::Error(message) => ("error", serde_json::json!({ "message": message })),
        };
        Event::default().event(name).data(data.to_string())
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Chat routes implementation
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/conversations", post(Self::create_conversation))
            .route(
                "/api/conversations/:conversation_id/messages",
                post(Self::send_message).get(Self::get_messages),
            )
            .with_state(resources)
    }

    /// Resolve the caller from the trusted identity headers
    async fn authenticate(
        headers: &HeaderMap,
        resources: &ServerResources,
    ) -> Result<(Tenant, Profile), AppError> {
        let tenant_id: TenantId = header_uuid(headers, TENANT_HEADER)?.into();
        let profile_id = header_uuid(headers, PROFILE_HEADER)?;

        let tenant = resources
            .database
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::auth_invalid("Unknown tenant"))?;
        let profile = resources
            .database
            .get_profile(tenant_id, profile_id)
            .await?
            .ok_or_else(|| AppError::auth_invalid("Unknown profile"))?;
        Ok((tenant, profile))
    }

    /// Create a conversation from its first message and stream the reply
    async fn create_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<SendMessageRequest>,
    ) -> Result<Response, AppError> {
        let (tenant, profile) = Self::authenticate(&headers, &resources).await?;
        if request.content.trim().is_empty() {
            return Err(AppError::invalid_input("Message content is empty"));
        }

        let conversation = resources
            .engine
            .start_conversation(&tenant, &profile, &request.content, None)
            .await?;
        info!(
            tenant_id = %tenant.id,
            conversation_id = %conversation.id,
            "Conversation created"
        );
        spawn_naming(&resources, &tenant, conversation.id, &request.content);

        let conversation_id = conversation.id;
        let context = resources.engine.context(tenant, conversation);
        let response = Self::stream_turn(&resources, &context, &profile, &request).await?;
        Ok(with_id_header(response, CONVERSATION_ID_HEADER, conversation_id))
    }

    /// Stream a follow-up reply in an existing conversation
    async fn send_message(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<Uuid>,
        Json(request): Json<SendMessageRequest>,
    ) -> Result<Response, AppError> {
        let (tenant, profile) = Self::authenticate(&headers, &resources).await?;
        let context = resources
            .engine
            .open(&tenant, &profile, conversation_id)
            .await?;
        Self::stream_turn(&resources, &context, &profile, &request).await
    }

    /// List a conversation's messages in order
    async fn get_messages(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<Uuid>,
    ) -> Result<Json<MessageListResponse>, AppError> {
        let (tenant, profile) = Self::authenticate(&headers, &resources).await?;
        let context = resources
            .engine
            .open(&tenant, &profile, conversation_id)
            .await?;
        let messages = resources
            .database
            .get_messages_for_conversation(tenant.id, conversation_id)
            .await?;
        Ok(Json(MessageListResponse {
            conversation_id: context.conversation().id,
            messages,
        }))
    }

    /// Prepare the turn, insert the placeholder and stream the generation
    ///
    /// Generation runs on its own task so the placeholder is finalized even
    /// when the client goes away. Dropping the response stream cancels the
    /// generation, which then stores the fallback message.
    async fn stream_turn(
        resources: &ServerResources,
        context: &ConversationContext,
        profile: &Profile,
        request: &SendMessageRequest,
    ) -> Result<Response, AppError> {
        let turn = context
            .prompt(profile, &request.content, &request.search, request.model.as_deref())
            .await?;

        let tenant = context.tenant().clone();
        let generator = resources.engine.generator().clone();
        let pending = generator
            .begin(
                &tenant,
                context.conversation().id,
                &turn.model,
                turn.search_options,
            )
            .await?;
        let message_id = pending.message_id();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let (tx, mut rx) = mpsc::channel::<TurnEvent>(PARTIAL_BUFFER);

        tokio::spawn(async move {
            let partial_tx = tx.clone();
            let on_partial = move |partial: PartialReply| {
                // A full buffer only drops intermediate text; `done` carries it all
                let _ = partial_tx.try_send(TurnEvent::Partial(partial.message));
            };
            let event = match generator
                .run(&tenant, pending, &turn.reply_context, on_partial, &task_cancel)
                .await
            {
                Ok(reply) => TurnEvent::Done(reply),
                Err(e) => {
                    warn!(%message_id, error = %e, "Failed to finalize streamed reply");
                    TurnEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(event).await;
        });

        // Armed before the body is polled so an unread response still cancels
        let cancel_on_drop = cancel.drop_guard();
        let stream = async_stream::stream! {
            let _cancel_on_drop = cancel_on_drop;
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                yield Ok::<Event, Infallible>(event.into_sse());
                if terminal {
                    break;
                }
            }
        };

        let response = Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response();
        Ok(with_id_header(response, MESSAGE_ID_HEADER, message_id))
    }
}

/// Name the conversation in the background; failures keep the fallback title
pub(crate) fn spawn_naming(
    resources: &ServerResources,
    tenant: &Tenant,
    conversation_id: Uuid,
    first_message: &str,
) {
    let engine = resources.engine.clone();
    let tenant = tenant.clone();
    let first_message = first_message.to_owned();
    tokio::spawn(async move {
        if let Err(e) = engine
            .name_conversation(&tenant, conversation_id, &first_message)
            .await
        {
            warn!(%conversation_id, error = %e, "Failed to store conversation title");
        }
    });
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Uuid, AppError> {
    let value = headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::auth_invalid(format!("Missing {name} header")))?;
    Uuid::parse_str(value.trim())
        .map_err(|_| AppError::auth_invalid(format!("Malformed {name} header")))
}
