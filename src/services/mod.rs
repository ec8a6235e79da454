// ABOUTME: Domain service layer for conversation turns shared by web, widget and Slack routes
// ABOUTME: Orchestration, reply generation, citation mapping, gates, identity and titles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Domain service layer
//!
//! Route handlers stay thin: they authenticate, call into these services and
//! render the result for their transport.

/// Source index reconciliation
pub mod citations;

/// Turn orchestration for every delivery surface
pub mod conversation_context;

/// Slack qualification gates
pub mod gates;

/// Sign-in by external identity
pub mod identity;

/// Placeholder-to-final reply state machine
pub mod reply_generator;

/// Conversation naming
pub mod titles;

pub use citations::reconcile_sources;
pub use conversation_context::{ChatEngine, ConversationContext, PreparedTurn, SlackOutcome};
pub use gates::{GateDecision, QualificationGates, SkipReason};
pub use identity::{slack_sign_in, widget_sign_in};
pub use reply_generator::{FinalReply, PendingReply, ReplyDraft, ReplyGenerator, ReplyState};
pub use titles::{fallback_title, TitleGenerator};
