// ABOUTME: Multi-tenant organization model with structured chatbot, search, Slack and billing settings
// ABOUTME: TenantId newtype plus settings types that resolve per-turn search options and models
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::source::{SearchOptions, SearchOverrides};

/// Type-safe wrapper for tenant identifiers
///
/// Provides compile-time distinction between tenant IDs and other UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Create a new random `TenantId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TenantId` from a UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TenantId> for Uuid {
    fn from(tenant_id: TenantId) -> Self {
        tenant_id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Chatbot persona configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatbotSettings {
    /// Grounding prompt template; `None` uses the built-in template
    pub grounding_prompt: Option<String>,
    /// Greeting shown before the first message
    pub welcome_message: Option<String>,
    /// Models users may pick
    pub enabled_models: Vec<String>,
    /// Model used when none is requested or the requested one is disabled
    pub default_model: String,
}

impl ChatbotSettings {
    /// Whether `model` may be used by this tenant
    #[must_use]
    pub fn is_model_enabled(&self, model: &str) -> bool {
        model == self.default_model || self.enabled_models.iter().any(|m| m == model)
    }
}

/// Which search flags a caller may override per turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchOverridePermissions {
    /// Breadth/depth toggle is user-controllable
    pub breadth: bool,
    /// Rerank toggle is user-controllable
    pub rerank: bool,
    /// Recency bias toggle is user-controllable
    pub prioritize_recent: bool,
}

/// Tenant search defaults plus override permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Flags used when the caller does not override
    pub defaults: SearchOptions,
    /// Flags the caller may override
    pub overrides: SearchOverridePermissions,
}

impl SearchSettings {
    /// Merge caller overrides into the tenant defaults
    ///
    /// An override only applies when the matching permission is granted.
    #[must_use]
    pub fn resolve(&self, requested: &SearchOverrides) -> SearchOptions {
        let pick = |allowed: bool, requested: Option<bool>, default: bool| {
            if allowed {
                requested.unwrap_or(default)
            } else {
                default
            }
        };

        SearchOptions {
            is_breadth: pick(
                self.overrides.breadth,
                requested.is_breadth,
                self.defaults.is_breadth,
            ),
            rerank_enabled: pick(
                self.overrides.rerank,
                requested.rerank_enabled,
                self.defaults.rerank_enabled,
            ),
            prioritize_recent: pick(
                self.overrides.prioritize_recent,
                requested.prioritize_recent,
                self.defaults.prioritize_recent,
            ),
        }
    }
}

/// How the bot behaves in a Slack channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlackChannelMode {
    /// Reply to any message that reads as a question
    #[default]
    AnswerQuestions,
    /// Only reply when the bot is mentioned
    MentionsOnly,
}

impl SlackChannelMode {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnswerQuestions => "answer_questions",
            Self::MentionsOnly => "mentions_only",
        }
    }
}

impl FromStr for SlackChannelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answer_questions" => Ok(Self::AnswerQuestions),
            "mentions_only" => Ok(Self::MentionsOnly),
            other => Err(format!("unknown slack channel mode: {other}")),
        }
    }
}

/// Slack workspace installation for a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackInstallation {
    /// Slack workspace (team) id
    pub team_id: String,
    /// Bot token used for Web API calls
    pub bot_token: String,
    /// Bot user id, used to ignore the bot's own messages
    pub bot_user_id: Option<String>,
    /// Mode for channels without an explicit setting
    pub default_channel_mode: SlackChannelMode,
    /// Per-channel modes keyed by channel id
    pub channel_modes: HashMap<String, SlackChannelMode>,
}

impl SlackInstallation {
    /// Effective mode for a channel
    #[must_use]
    pub fn channel_mode(&self, channel: &str) -> SlackChannelMode {
        self.channel_modes
            .get(channel)
            .copied()
            .unwrap_or(self.default_channel_mode)
    }
}

/// One entry in a tenant's plan history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanChange {
    /// Plan name after the change
    pub plan: String,
    /// When the change took effect
    pub changed_at: DateTime<Utc>,
}

/// Billing references, each evolving independently
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BillingAccount {
    /// Payment processor customer id
    pub stripe_customer_id: Option<String>,
    /// Usage billing customer id
    pub orb_customer_id: Option<String>,
    /// Plan changes, oldest first
    pub plan_history: Vec<PlanChange>,
}

/// Tenant organization; read-only during a conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant identifier
    pub id: TenantId,
    /// Organization name, exposed to prompts as `company.name`
    pub name: String,
    /// URL-safe slug
    pub slug: String,
    /// Public id used by the anonymous widget
    pub public_chatbot_id: Uuid,
    /// Chatbot persona and models
    pub chatbot: ChatbotSettings,
    /// Search defaults and permissions
    pub search: SearchSettings,
    /// Slack installation, when connected
    pub slack: Option<SlackInstallation>,
    /// Billing references
    pub billing: BillingAccount,
    /// When tenant was created
    pub created_at: DateTime<Utc>,
    /// When tenant was last updated
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Creates a tenant with default search settings and no integrations
    #[must_use]
    pub fn new(name: String, slug: String, chatbot: ChatbotSettings) -> Self {
        let now = Utc::now();
        Self {
            id: TenantId::new(),
            name,
            slug,
            public_chatbot_id: Uuid::new_v4(),
            chatbot,
            search: SearchSettings::default(),
            slack: None,
            billing: BillingAccount::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(overrides: SearchOverridePermissions) -> SearchSettings {
        SearchSettings {
            defaults: SearchOptions {
                is_breadth: false,
                rerank_enabled: true,
                prioritize_recent: false,
            },
            overrides,
        }
    }

    #[test]
    fn test_overrides_ignored_without_permission() {
        let resolved = settings(SearchOverridePermissions::default()).resolve(&SearchOverrides {
            is_breadth: Some(true),
            rerank_enabled: Some(false),
            prioritize_recent: Some(true),
        });
        assert_eq!(
            resolved,
            SearchOptions {
                is_breadth: false,
                rerank_enabled: true,
                prioritize_recent: false,
            }
        );
    }

    #[test]
    fn test_overrides_apply_per_permission() {
        let resolved = settings(SearchOverridePermissions {
            breadth: true,
            rerank: false,
            prioritize_recent: true,
        })
        .resolve(&SearchOverrides {
            is_breadth: Some(true),
            rerank_enabled: Some(false),
            prioritize_recent: None,
        });
        assert!(resolved.is_breadth);
        assert!(resolved.rerank_enabled);
        assert!(!resolved.prioritize_recent);
    }

    #[test]
    fn test_model_enablement_includes_default() {
        let chatbot = ChatbotSettings {
            grounding_prompt: None,
            welcome_message: None,
            enabled_models: vec!["gpt-4o-mini".to_owned()],
            default_model: "gpt-4o".to_owned(),
        };
        assert!(chatbot.is_model_enabled("gpt-4o"));
        assert!(chatbot.is_model_enabled("gpt-4o-mini"));
        assert!(!chatbot.is_model_enabled("gemini-2.0-flash"));
    }

    #[test]
    fn test_slack_channel_mode_lookup() {
        let mut channel_modes = HashMap::new();
        channel_modes.insert("C1".to_owned(), SlackChannelMode::MentionsOnly);
        let install = SlackInstallation {
            team_id: "T1".to_owned(),
            bot_token: "xoxb".to_owned(),
            bot_user_id: None,
            default_channel_mode: SlackChannelMode::AnswerQuestions,
            channel_modes,
        };
        assert_eq!(install.channel_mode("C1"), SlackChannelMode::MentionsOnly);
        assert_eq!(install.channel_mode("C2"), SlackChannelMode::AnswerQuestions);
        assert_eq!(
            "mentions_only".parse::<SlackChannelMode>(),
            Ok(SlackChannelMode::MentionsOnly)
        );
    }
}
