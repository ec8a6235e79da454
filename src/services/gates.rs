// ABOUTME: Qualification gates deciding whether a shared-channel message gets a reply
// ABOUTME: Each model call runs under a time budget and any failure closes the gate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::prompts::{IS_ANSWERED_PROMPT, IS_QUESTION_PROMPT};
use crate::llm::{ChatMessage, ModelAdapter};
use crate::models::SlackChannelMode;

/// Why a message or reply was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Channel only answers explicit mentions
    MentionRequired,
    /// Message does not read as a question
    NotAQuestion,
    /// Gate model failed or ran out of time
    GateUnavailable,
    /// Reply cited no sources
    NoSources,
    /// Reply judged not to answer the question
    NotAnswered,
    /// Reply generation failed
    GenerationFailed,
}

impl SkipReason {
    /// Stable name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MentionRequired => "mention_required",
            Self::NotAQuestion => "not_a_question",
            Self::GateUnavailable => "gate_unavailable",
            Self::NoSources => "no_sources",
            Self::NotAnswered => "not_answered",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue
    Pass,
    /// Stop without replying
    Skip(SkipReason),
}

impl GateDecision {
    /// Whether the gate let the message through
    #[must_use]
    pub const fn passed(self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsQuestion {
    is_question: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsAnswered {
    is_answered: bool,
}

/// Pre- and post-generation checks for shared channels
#[derive(Clone)]
pub struct QualificationGates {
    adapter: ModelAdapter,
    model: String,
    timeout: Duration,
}

impl QualificationGates {
    /// Create gates using `model` with a per-call `timeout`
    #[must_use]
    pub fn new(adapter: ModelAdapter, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            adapter,
            model: model.into(),
            timeout,
        }
    }

    /// Decide whether a channel message should get a reply at all
    ///
    /// A mention is an explicit request and skips the question check.
    pub async fn should_reply_to_message(
        &self,
        text: &str,
        mode: SlackChannelMode,
        mentioned: bool,
    ) -> GateDecision {
        if mentioned {
            return GateDecision::Pass;
        }
        if mode == SlackChannelMode::MentionsOnly {
            return GateDecision::Skip(SkipReason::MentionRequired);
        }

        let messages = [ChatMessage::system(IS_QUESTION_PROMPT), ChatMessage::user(text)];
        match self.ask::<IsQuestion>(&messages).await {
            Some(answer) if answer.is_question => GateDecision::Pass,
            Some(_) => GateDecision::Skip(SkipReason::NotAQuestion),
            None => GateDecision::Skip(SkipReason::GateUnavailable),
        }
    }

    /// Decide whether a generated reply is worth posting
    ///
    /// Replies that cite nothing are rejected without a model call.
    pub async fn is_answered(&self, question: &str, answer: &str, cited_sources: usize) -> GateDecision {
        if cited_sources == 0 {
            return GateDecision::Skip(SkipReason::NoSources);
        }

        let messages = [
            ChatMessage::system(IS_ANSWERED_PROMPT),
            ChatMessage::user(format!("Question:\n{question}\n\nAnswer:\n{answer}")),
        ];
        match self.ask::<IsAnswered>(&messages).await {
            Some(verdict) if verdict.is_answered => GateDecision::Pass,
            Some(_) => GateDecision::Skip(SkipReason::NotAnswered),
            None => GateDecision::Skip(SkipReason::GateUnavailable),
        }
    }

    async fn ask<T: serde::de::DeserializeOwned>(&self, messages: &[ChatMessage]) -> Option<T> {
        match tokio::time::timeout(self.timeout, self.adapter.complete_json(&self.model, messages)).await {
            Ok(Ok(answer)) => {
                debug!(model = %self.model, "Gate answered");
                Some(answer)
            }
            Ok(Err(e)) => {
                warn!(error = %e, model = %self.model, "Gate call failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis(), model = %self.model, "Gate call timed out");
                None
            }
        }
    }
}
