// ABOUTME: Prompt templates for grounding, JSON instructions, channel gates and titles
// ABOUTME: Loaded at compile time from markdown files kept next to this module
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Prompts
//!
//! Prompts are loaded at compile time from markdown files for easy maintenance.

/// Grounding template used when a tenant has not configured its own
///
/// Recognized variables: `{{company.name}}`, `{{now}}`, `{{chunks}}`.
pub const DEFAULT_GROUNDING_PROMPT: &str = include_str!("grounding.md");

/// Textual JSON instruction for models that cannot enforce a schema
pub const JSON_REPLY_INSTRUCTIONS: &str = include_str!("json_reply.md");

/// Pre-generation gate: is a channel message a question worth answering
pub const IS_QUESTION_PROMPT: &str = include_str!("is_question.md");

/// Post-generation gate: does a drafted reply actually answer the question
pub const IS_ANSWERED_PROMPT: &str = include_str!("is_answered.md");

/// Conversation naming
pub const TITLE_PROMPT: &str = include_str!("title.md");
