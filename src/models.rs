// ABOUTME: Domain data models for tenants, identities, conversations and sources
// ABOUTME: Re-exports the shared model types from base-chat-core
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Data Models
//!
//! The model types live in `base-chat-core` so they can be shared with other
//! crates without pulling in the server stack.

pub use base_chat_core::models::{
    AgenticInfo, AgenticStep, BillingAccount, ChatbotSettings, Conversation, Message,
    MessageRole, NewMessage, PlanChange, Profile, ProfileRole, SearchOptions, SearchOverrides,
    SearchOverridePermissions, SearchSettings, SlackChannelMode, SlackInstallation, Source,
    Tenant, TenantId, User,
};
