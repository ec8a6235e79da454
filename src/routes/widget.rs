// ABOUTME: Anonymous widget route answering with a buffered JSON reply
// ABOUTME: Callers are keyed by the tenant's public chatbot id plus a client-held session id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Widget routes
//!
//! The widget has no authenticated session. Each browser session signs in as
//! a guest profile of the tenant that owns the public chatbot id.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::chat::spawn_naming;
use super::{with_id_header, MESSAGE_ID_HEADER};
use crate::errors::AppError;
use crate::models::{SearchOverrides, Source};
use crate::resources::ServerResources;
use crate::services::widget_sign_in;

/// A widget message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetMessageRequest {
    /// Browser session id generated by the widget
    pub session_id: String,
    /// Message content
    pub content: String,
    /// Existing conversation to continue
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

/// Buffered widget reply
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetMessageResponse {
    /// Conversation id to send with follow-ups
    pub conversation_id: Uuid,
    /// Assistant message id
    pub message_id: Uuid,
    /// Reply content
    pub message: String,
    /// Cited sources in prompt order
    pub sources: Vec<Source>,
}

/// Widget routes implementation
pub struct WidgetRoutes;

impl WidgetRoutes {
    /// Create all widget routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/api/widget/:chatbot_id/messages",
                post(Self::send_message),
            )
            .with_state(resources)
    }

    async fn send_message(
        State(resources): State<Arc<ServerResources>>,
        Path(chatbot_id): Path<Uuid>,
        Json(request): Json<WidgetMessageRequest>,
    ) -> Result<Response, AppError> {
        if request.session_id.trim().is_empty() {
            return Err(AppError::invalid_input("sessionId is required"));
        }
        if request.content.trim().is_empty() {
            return Err(AppError::invalid_input("Message content is empty"));
        }

        let (tenant, profile) =
            widget_sign_in(&resources.database, chatbot_id, request.session_id.trim()).await?;

        let context = match request.conversation_id {
            Some(conversation_id) => {
                resources
                    .engine
                    .open(&tenant, &profile, conversation_id)
                    .await?
            }
            None => {
                let conversation = resources
                    .engine
                    .start_conversation(&tenant, &profile, &request.content, None)
                    .await?;
                info!(
                    tenant_id = %tenant.id,
                    conversation_id = %conversation.id,
                    "Widget conversation created"
                );
                spawn_naming(&resources, &tenant, conversation.id, &request.content);
                resources.engine.context(tenant.clone(), conversation)
            }
        };

        let turn = context
            .prompt(&profile, &request.content, &SearchOverrides::default(), None)
            .await?;
        let generator = resources.engine.generator().clone();
        let pending = generator
            .begin(
                &tenant,
                context.conversation().id,
                &turn.model,
                turn.search_options,
            )
            .await?;

        // The task outlives a dropped request so the placeholder is always finalized
        let reply = tokio::spawn(async move {
            generator
                .run(
                    &tenant,
                    pending,
                    &turn.reply_context,
                    |_| {},
                    &CancellationToken::new(),
                )
                .await
        })
        .await
        .map_err(|e| AppError::internal(format!("Reply task failed: {e}")))??;

        let message_id = reply.message_id;
        let body = Json(WidgetMessageResponse {
            conversation_id: reply.conversation_id,
            message_id,
            message: reply.content,
            sources: reply.sources,
        })
        .into_response();
        Ok(with_id_header(body, MESSAGE_ID_HEADER, message_id))
    }
}
