// ABOUTME: Typed Slack Events API payloads with explicit variants for unhandled types
// ABOUTME: Normalizes message and app_mention events into inbound channel messages
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use serde::Deserialize;

/// Outer Events API payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    /// Endpoint ownership check sent when the URL is configured
    UrlVerification {
        /// Value to echo back
        challenge: String,
    },
    /// A subscribed event
    EventCallback(EventCallback),
    /// Any other payload type
    #[serde(other)]
    Unknown,
}

/// Event delivery wrapper
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventCallback {
    /// Workspace the event came from
    pub team_id: String,
    /// Delivery id, stable across retries
    #[serde(default)]
    pub event_id: Option<String>,
    /// The event itself
    pub event: SlackEvent,
}

/// Inner event payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    /// A message posted in a channel the bot is in
    Message(MessageEvent),
    /// A message mentioning the bot
    AppMention(MessageEvent),
    /// Any other event type
    #[serde(other)]
    Unknown,
}

/// Fields shared by `message` and `app_mention` events
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    /// Author; absent for some system messages
    #[serde(default)]
    pub user: Option<String>,
    /// Message text
    #[serde(default)]
    pub text: Option<String>,
    /// Channel id
    pub channel: String,
    /// Message timestamp, used as its id
    pub ts: String,
    /// Thread root timestamp for replies
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Set for edits, joins and other non-plain messages
    #[serde(default)]
    pub subtype: Option<String>,
    /// Set when a bot authored the message
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// A channel message that may warrant a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Workspace id
    pub team_id: String,
    /// Channel id
    pub channel: String,
    /// Author id
    pub user: String,
    /// Text with bot mentions removed
    pub text: String,
    /// Message timestamp
    pub ts: String,
    /// Thread the reply belongs in
    pub thread_ts: String,
    /// Whether the bot was addressed directly
    pub mentioned: bool,
}

impl InboundMessage {
    /// Key grouping a Slack thread into one conversation
    #[must_use]
    pub fn thread_key(&self) -> String {
        format!("{}:{}", self.channel, self.thread_ts)
    }
}

impl SlackEvent {
    /// Normalize into an inbound message, or `None` if the event needs no reply
    ///
    /// A plain message that mentions the bot is dropped because the same
    /// text also arrives as an `app_mention` event.
    #[must_use]
    pub fn into_inbound(self, team_id: &str, bot_user_id: Option<&str>) -> Option<InboundMessage> {
        let (event, mentioned) = match self {
            Self::AppMention(event) => (event, true),
            Self::Message(event) => (event, false),
            Self::Unknown => return None,
        };

        if event.subtype.is_some() || event.bot_id.is_some() {
            return None;
        }
        let user = event.user?;
        if bot_user_id == Some(user.as_str()) {
            return None;
        }
        let raw = event.text?;
        if !mentioned && bot_user_id.is_some_and(|bot| raw.contains(&format!("<@{bot}>"))) {
            return None;
        }

        let text = strip_mentions(&raw, bot_user_id);
        if text.is_empty() {
            return None;
        }

        Some(InboundMessage {
            team_id: team_id.to_owned(),
            channel: event.channel,
            user,
            text,
            thread_ts: event.thread_ts.unwrap_or_else(|| event.ts.clone()),
            ts: event.ts,
            mentioned,
        })
    }
}

/// Remove `<@BOT>` tokens and tidy whitespace
fn strip_mentions(text: &str, bot_user_id: Option<&str>) -> String {
    let cleaned = match bot_user_id {
        Some(bot) => text.replace(&format!("<@{bot}>"), " "),
        None => text.to_owned(),
    };
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
