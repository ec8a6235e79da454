// ABOUTME: Conversation and message records for tenant-scoped chat history
// ABOUTME: Assistant messages start as null-content placeholders and are finalized once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::source::{AgenticInfo, SearchOptions, Source};
use super::tenant::TenantId;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction
    System,
    /// End-user message
    User,
    /// Model reply
    Assistant,
}

impl MessageRole {
    /// Convert to string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// A conversation owned by one profile in one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning profile
    pub profile_id: Uuid,
    /// Title derived from the first user message
    pub title: String,
    /// `channel:thread_ts` for Slack-originated conversations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_thread_key: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// A persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning conversation
    pub conversation_id: Uuid,
    /// Storage-assigned insertion order
    pub sequence: i64,
    /// Sender role
    pub role: MessageRole,
    /// Content; `None` while an assistant reply is in flight
    pub content: Option<String>,
    /// Cited sources in prompt order
    pub sources: Vec<Source>,
    /// Model that produced an assistant message
    pub model: Option<String>,
    /// Search flags active when the reply was generated
    pub search_options: Option<SearchOptions>,
    /// Multi-step retrieval details
    pub agentic_info: Option<AgenticInfo>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True for an assistant row still waiting for its content
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.role == MessageRole::Assistant && self.content.is_none()
    }
}

/// Fields for inserting a message
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning conversation
    pub conversation_id: Uuid,
    /// Sender role
    pub role: MessageRole,
    /// Initial content
    pub content: Option<String>,
    /// Initial sources
    pub sources: Vec<Source>,
    /// Model for assistant rows
    pub model: Option<String>,
    /// Search flags for assistant rows
    pub search_options: Option<SearchOptions>,
    /// Multi-step retrieval details
    pub agentic_info: Option<AgenticInfo>,
}

impl NewMessage {
    /// A user message with content
    #[must_use]
    pub fn user(tenant_id: TenantId, conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            tenant_id,
            conversation_id,
            role: MessageRole::User,
            content: Some(content.into()),
            sources: Vec::new(),
            model: None,
            search_options: None,
            agentic_info: None,
        }
    }

    /// An assistant placeholder with null content
    #[must_use]
    pub fn assistant_placeholder(
        tenant_id: TenantId,
        conversation_id: Uuid,
        model: impl Into<String>,
        search_options: SearchOptions,
    ) -> Self {
        Self {
            tenant_id,
            conversation_id,
            role: MessageRole::Assistant,
            content: None,
            sources: Vec::new(),
            model: Some(model.into()),
            search_options: Some(search_options),
            agentic_info: None,
        }
    }
}
