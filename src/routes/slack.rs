// ABOUTME: Slack Events API webhook verifying request signatures and dispatching channel messages
// ABOUTME: Acknowledges every signed delivery immediately and handles the event on a background task
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Slack webhook routes
//!
//! Slack retries deliveries that are not acknowledged within three seconds,
//! so the handler only verifies and parses before answering `200 OK`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{AppError, ErrorCode};
use crate::resources::ServerResources;
use crate::services::SlackOutcome;
use crate::slack::{EventCallback, SlackEnvelope, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Set by Slack on redeliveries of an event it already sent
pub const RETRY_HEADER: &str = "x-slack-retry-num";

/// Slack routes implementation
pub struct SlackRoutes;

impl SlackRoutes {
    /// Create the Events API route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/slack/events", post(Self::handle_events))
            .with_state(resources)
    }

    async fn handle_events(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, AppError> {
        let verifier = resources
            .slack_signature
            .as_ref()
            .ok_or_else(|| AppError::config("Slack signing secret is not configured"))?;
        let timestamp = header_str(&headers, TIMESTAMP_HEADER)?;
        let signature = header_str(&headers, SIGNATURE_HEADER)?;
        verifier.verify(timestamp, signature, &body, Utc::now().timestamp())?;

        let envelope: SlackEnvelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable Slack payload");
                return Ok(StatusCode::OK.into_response());
            }
        };

        match envelope {
            SlackEnvelope::UrlVerification { challenge } => {
                info!("Answering Slack URL verification");
                Ok(Json(serde_json::json!({ "challenge": challenge })).into_response())
            }
            SlackEnvelope::EventCallback(callback) => {
                if let Some(retry) = headers.get(RETRY_HEADER) {
                    debug!(event_id = ?callback.event_id, ?retry, "Skipping Slack redelivery");
                    return Ok(StatusCode::OK.into_response());
                }
                tokio::spawn(Self::dispatch(resources, callback));
                Ok(StatusCode::OK.into_response())
            }
            SlackEnvelope::Unknown => Ok(StatusCode::OK.into_response()),
        }
    }

    /// Handle one event callback after the delivery was acknowledged
    pub async fn dispatch(resources: Arc<ServerResources>, callback: EventCallback) {
        let tenant = match resources
            .database
            .get_tenant_by_slack_team(&callback.team_id)
            .await
        {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                warn!(team_id = %callback.team_id, "Slack event for a workspace without an installation");
                return;
            }
            Err(e) => {
                warn!(team_id = %callback.team_id, error = %e, "Failed to load Slack installation");
                return;
            }
        };
        let bot_user_id = tenant
            .slack
            .as_ref()
            .and_then(|install| install.bot_user_id.as_deref());

        let Some(inbound) = callback.event.into_inbound(&callback.team_id, bot_user_id) else {
            debug!(event_id = ?callback.event_id, "Slack event needs no reply");
            return;
        };

        match resources
            .engine
            .prompt_from_message_event(&inbound, resources.slack.as_ref())
            .await
        {
            Ok(SlackOutcome::Posted(reply)) => {
                info!(message_id = %reply.message_id, "Slack reply delivered");
            }
            Ok(SlackOutcome::Suppressed {
                conversation_id,
                reason,
            }) => {
                info!(%conversation_id, %reason, "Slack reply suppressed");
            }
            Ok(SlackOutcome::Skipped(reason)) => {
                debug!(%reason, "Slack message skipped");
            }
            Err(e) if e.code == ErrorCode::UnknownTenant => {
                warn!(team_id = %inbound.team_id, "Slack message from an unknown workspace");
            }
            Err(e) => {
                warn!(team_id = %inbound.team_id, error = %e, "Failed to answer Slack message");
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::auth_invalid(format!("Missing {name} header")))
}
