// ABOUTME: Conversation naming from the first user message
// ABOUTME: Falls back to the truncated message when the naming call fails
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use serde::Deserialize;
use tracing::warn;

use crate::llm::prompts::TITLE_PROMPT;
use crate::llm::{ChatMessage, ModelAdapter};

const MAX_TITLE_CHARS: usize = 60;

#[derive(Debug, Deserialize)]
struct Title {
    title: String,
}

/// Title derived locally from the first message
#[must_use]
pub fn fallback_title(first_message: &str) -> String {
    let collapsed = first_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "New conversation".to_owned();
    }
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_TITLE_CHARS - 1).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push('…');
    truncated
}

/// Names conversations with a model call
#[derive(Clone)]
pub struct TitleGenerator {
    adapter: ModelAdapter,
    model: String,
}

impl TitleGenerator {
    /// Create a generator using `model`
    #[must_use]
    pub fn new(adapter: ModelAdapter, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
        }
    }

    /// Title for a conversation starting with `first_message`; never fails
    pub async fn generate(&self, first_message: &str) -> String {
        let messages = [ChatMessage::system(TITLE_PROMPT), ChatMessage::user(first_message)];
        match self.adapter.complete_json::<Title>(&self.model, &messages).await {
            Ok(Title { title }) if !title.trim().is_empty() => fallback_title(&title),
            Ok(_) => fallback_title(first_message),
            Err(e) => {
                warn!(error = %e, "Conversation naming failed, using message text");
                fallback_title(first_message)
            }
        }
    }
}
