// ABOUTME: Renders assistant replies as Slack mrkdwn with a cited-sources footer
// ABOUTME: Converts common Markdown constructs and deduplicates sources by document
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::Source;

static MARKDOWN_LINK: OnceLock<Option<Regex>> = OnceLock::new();
static MARKDOWN_BOLD: OnceLock<Option<Regex>> = OnceLock::new();

fn markdown_link() -> Option<&'static Regex> {
    MARKDOWN_LINK
        .get_or_init(|| Regex::new(r"\[([^\]|]+)\]\((https?://[^)\s|]+)\)").ok())
        .as_ref()
}

fn markdown_bold() -> Option<&'static Regex> {
    MARKDOWN_BOLD
        .get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").ok())
        .as_ref()
}

/// Escape the three characters Slack treats as control sequences
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a link target; `|` would end the URL inside `<url|text>`
fn escape_url(url: &str) -> String {
    escape(url).replace('|', "%7C")
}

/// Convert Markdown links and bold to mrkdwn
///
/// The text is escaped first, so only the links produced here reach Slack
/// as control sequences. `<!channel>` or `<@U123>` in a reply stays inert.
#[must_use]
pub fn to_mrkdwn(markdown: &str) -> String {
    let mut text = escape(markdown);
    if let Some(bold) = markdown_bold() {
        text = bold.replace_all(&text, "*$1*").into_owned();
    }
    if let Some(link) = markdown_link() {
        text = link.replace_all(&text, "<$2|$1>").into_owned();
    }
    text
}

/// Reply text followed by one bullet per cited document
#[must_use]
pub fn format_reply(message: &str, sources: &[Source]) -> String {
    let mut out = to_mrkdwn(message.trim());

    let mut seen = HashSet::new();
    let bullets: Vec<String> = sources
        .iter()
        .filter(|source| seen.insert(source.document_id.as_str()))
        .map(|source| {
            let name = escape(&source.document_name);
            match &source.url {
                Some(url) => format!("• <{}|{name}>", escape_url(url)),
                None => format!("• {name}"),
            }
        })
        .collect();

    if !bullets.is_empty() {
        out.push_str("\n\n*Sources:*\n");
        out.push_str(&bullets.join("\n"));
    }
    out
}
