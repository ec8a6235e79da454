// ABOUTME: Route module organization for the chat server HTTP endpoints
// ABOUTME: Web chat, anonymous widget, Slack webhook and health routes with shared response helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! HTTP routes
//!
//! Each domain module contains only route definitions and thin handlers
//! that delegate to the service layer.

use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use uuid::Uuid;

/// Web chat conversation routes
pub mod chat;
/// Health check routes
pub mod health;
/// Slack Events API webhook
pub mod slack;
/// Anonymous embeddable widget routes
pub mod widget;

pub use chat::ChatRoutes;
pub use health::HealthRoutes;
pub use slack::SlackRoutes;
pub use widget::WidgetRoutes;

/// Response header carrying the assistant message id
pub const MESSAGE_ID_HEADER: &str = "x-message-id";

/// Response header carrying the conversation id
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

/// Attach an id header to a response
pub(crate) fn with_id_header(mut response: Response, name: &'static str, id: Uuid) -> Response {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
    response
}
