// ABOUTME: Domain models shared by persistence, orchestration and delivery layers
// ABOUTME: Re-exports tenant, identity, conversation and source types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

/// Conversations, messages and roles
pub mod conversation;
/// Users and tenant-scoped profiles
pub mod identity;
/// Citation sources, search options and agentic run details
pub mod source;
/// Tenants and their structured settings
pub mod tenant;

pub use conversation::{Conversation, Message, MessageRole, NewMessage};
pub use identity::{Profile, ProfileRole, User};
pub use source::{AgenticInfo, AgenticStep, SearchOptions, SearchOverrides, Source};
pub use tenant::{
    BillingAccount, ChatbotSettings, PlanChange, SearchOverridePermissions, SearchSettings,
    SlackChannelMode, SlackInstallation, Tenant, TenantId,
};
