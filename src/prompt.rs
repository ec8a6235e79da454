// ABOUTME: Prompt assembly from the tenant grounding template, retrieved chunks and history
// ABOUTME: Produces the model message sequence plus the source list in chunk injection order
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Prompt Assembly
//!
//! The model cites sources by their position in [`ReplyContext::sources`].
//! That list is built in the same pass that numbers the chunks in the
//! prompt, so position `i` in the prompt is position `i` in the list.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};

use crate::llm::prompts::DEFAULT_GROUNDING_PROMPT;
use crate::llm::ChatMessage;
use crate::models::{Message, MessageRole, Source, Tenant};
use crate::retrieval::ScoredChunk;

const NO_DOCUMENTS: &str = "No documents matched this question.";

/// Everything a reply generation needs for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyContext {
    /// System prompt, history and the current user message
    pub messages: Vec<ChatMessage>,
    /// Citation candidates, indexed as numbered in the prompt
    pub sources: Vec<Source>,
}

static TEMPLATE_VARIABLE: OnceLock<Option<Regex>> = OnceLock::new();

fn template_variable() -> Option<&'static Regex> {
    TEMPLATE_VARIABLE
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").ok())
        .as_ref()
}

/// Substitute `{{name}}` tokens; unknown names stay as literal text
#[must_use]
pub fn render_template(template: &str, variables: &HashMap<&str, String>) -> String {
    let Some(pattern) = template_variable() else {
        return template.to_owned();
    };
    pattern
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            variables
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

/// Serialize chunks for the `{{chunks}}` variable, numbered from zero
#[must_use]
pub fn format_chunks(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_DOCUMENTS.to_owned();
    }
    let mut out = String::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "[{index}] {}", chunk.document_name);
        let _ = writeln!(out, "{}", chunk.text.trim());
    }
    out
}

/// Builds model-ready prompts for a tenant
#[derive(Debug, Clone, Copy)]
pub struct PromptAssembler {
    history_window: usize,
}

impl PromptAssembler {
    /// Assembler keeping at most `history_window` prior messages
    #[must_use]
    pub const fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    /// Assemble using the current time
    #[must_use]
    pub fn assemble(&self, tenant: &Tenant, history: &[Message], chunks: &[ScoredChunk]) -> ReplyContext {
        self.assemble_at(tenant, history, chunks, Utc::now())
    }

    /// Assemble with an explicit clock
    ///
    /// `history` is the conversation in storage order and ends with the
    /// current user message. Placeholders and system rows are skipped.
    #[must_use]
    pub fn assemble_at(
        &self,
        tenant: &Tenant,
        history: &[Message],
        chunks: &[ScoredChunk],
        now: DateTime<Utc>,
    ) -> ReplyContext {
        let template = tenant
            .chatbot
            .grounding_prompt
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_GROUNDING_PROMPT);

        let mut variables = HashMap::new();
        variables.insert("company.name", tenant.name.clone());
        variables.insert("now", now.to_rfc3339_opts(SecondsFormat::Secs, true));
        variables.insert("chunks", format_chunks(chunks));

        let mut messages = vec![ChatMessage::system(render_template(template, &variables))];

        let turns: Vec<&Message> = history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .filter(|m| m.content.as_deref().is_some_and(|c| !c.is_empty()))
            .collect();
        let skip = turns.len().saturating_sub(self.history_window.max(1));
        messages.extend(turns.into_iter().skip(skip).filter_map(|m| {
            m.content
                .as_deref()
                .map(|content| ChatMessage::new(m.role, content))
        }));

        ReplyContext {
            messages,
            sources: chunks.iter().map(ScoredChunk::to_source).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatbotSettings, TenantId};
    use chrono::TimeZone;
    use serde_json::Map;
    use uuid::Uuid;

    fn tenant(template: Option<&str>) -> Tenant {
        Tenant::new(
            "Acme Co.".to_owned(),
            "acme".to_owned(),
            ChatbotSettings {
                grounding_prompt: template.map(str::to_owned),
                welcome_message: None,
                enabled_models: vec![],
                default_model: "gpt-4o".to_owned(),
            },
        )
    }

    fn chunk(id: &str) -> ScoredChunk {
        ScoredChunk {
            document_id: id.to_owned(),
            document_name: format!("{id}.pdf"),
            text: format!("text of {id}"),
            score: 0.5,
            metadata: Map::new(),
        }
    }

    fn message(seq: i64, role: MessageRole, content: Option<&str>) -> Message {
        Message {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new(),
            conversation_id: Uuid::new_v4(),
            sequence: seq,
            role,
            content: content.map(str::to_owned),
            sources: vec![],
            model: None,
            search_options: None,
            agentic_info: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unknown_variables_stay_literal() {
        let mut vars = HashMap::new();
        vars.insert("company.name", "Acme".to_owned());
        assert_eq!(
            render_template("Hi {{ company.name }}, {{foo.bar}} {{ }}", &vars),
            "Hi Acme, {{foo.bar}} {{ }}"
        );
    }

    #[test]
    fn test_sources_follow_chunk_order() {
        let chunks = vec![chunk("b"), chunk("a"), chunk("b")];
        let ctx = PromptAssembler::new(10).assemble(
            &tenant(None),
            &[message(1, MessageRole::User, Some("q"))],
            &chunks,
        );
        let ids: Vec<_> = ctx.sources.iter().map(|s| s.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "b"]);

        let system = &ctx.messages[0].content;
        let first = system.find("[0] b.pdf").unwrap();
        let second = system.find("[1] a.pdf").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_history_window_and_placeholders() {
        let history = vec![
            message(1, MessageRole::User, Some("one")),
            message(2, MessageRole::Assistant, Some("two")),
            message(3, MessageRole::User, Some("three")),
            message(4, MessageRole::Assistant, None),
            message(5, MessageRole::User, Some("four")),
        ];
        let ctx = PromptAssembler::new(2).assemble(&tenant(None), &history, &[]);
        let contents: Vec<_> = ctx.messages[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "four"]);
        assert!(ctx.messages[0].content.contains(NO_DOCUMENTS));
    }

    #[test]
    fn test_tenant_template_rendered_with_fixed_clock() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let ctx = PromptAssembler::new(5).assemble_at(
            &tenant(Some("{{company.name}} at {{now}} {{foo.bar}}")),
            &[message(1, MessageRole::User, Some("q"))],
            &[],
            now,
        );
        assert_eq!(ctx.messages[0].content, "Acme Co. at 2025-03-01T12:00:00Z {{foo.bar}}");
        assert_eq!(ctx.messages[1], ChatMessage::user("q"));
    }
}
