// ABOUTME: Structured reply schema and defensive parsing of model output
// ABOUTME: Extracts the partial message from incomplete JSON while a reply streams in
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Structured Replies
//!
//! Every provider's output is normalized into [`GeneratedReply`]. Output that
//! cannot be parsed becomes a reply whose message is the raw text and which
//! cites nothing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ResponseFormat;

const SCHEMA_NAME: &str = "reply";

/// Normalized model reply
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedReply {
    /// Answer text shown to the user
    pub message: String,
    /// Positions in the prompt-time source list the answer relied on
    #[serde(default)]
    pub used_source_indexes: Vec<i64>,
}

impl GeneratedReply {
    /// Reply made of raw text with no citations
    #[must_use]
    pub fn unstructured(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            used_source_indexes: Vec::new(),
        }
    }
}

/// JSON schema for [`GeneratedReply`]
#[must_use]
pub fn reply_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" },
            "usedSourceIndexes": { "type": "array", "items": { "type": "integer" } }
        },
        "required": ["message", "usedSourceIndexes"],
        "additionalProperties": false
    })
}

/// Response format requesting a [`GeneratedReply`]
#[must_use]
pub fn reply_format() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        name: SCHEMA_NAME.to_owned(),
        schema: reply_schema(),
    }
}

/// Parse complete model output into a reply, never failing
#[must_use]
pub fn parse_reply(raw: &str) -> GeneratedReply {
    let cleaned = strip_reasoning(raw);
    let Some(value) = extract_json_object(&cleaned) else {
        return GeneratedReply::unstructured(cleaned.trim());
    };

    let Some(message) = value.get("message").and_then(Value::as_str) else {
        return GeneratedReply::unstructured(cleaned.trim());
    };

    let used_source_indexes = value
        .get("usedSourceIndexes")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    GeneratedReply {
        message: message.to_owned(),
        used_source_indexes,
    }
}

/// Parse a small JSON object answer (gates, titles)
#[must_use]
pub fn parse_json_answer<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let cleaned = strip_reasoning(raw);
    extract_json_object(&cleaned).and_then(|value| serde_json::from_value(value).ok())
}

/// Drop `<think>` blocks emitted by reasoning models
fn strip_reasoning(raw: &str) -> String {
    let mut text = raw.to_owned();
    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
            None => text.truncate(start),
        }
    }
    text
}

/// Find a JSON object in text that may be fenced or surrounded by prose
fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.find('\n').map_or(rest, |newline| &rest[newline + 1..]);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Decode the `message` value received so far from possibly incomplete JSON
///
/// Returns `None` until the opening quote of the message value has arrived.
#[must_use]
pub fn partial_message(buffer: &str) -> Option<String> {
    let key_pos = buffer.find("\"message\"")?;
    let after_key = buffer[key_pos + "\"message\"".len()..].trim_start();
    let after_colon = after_key.strip_prefix(':')?.trim_start();
    let body = after_colon.strip_prefix('"')?;

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    if hex.len() < 4 {
                        break;
                    }
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => out.push(decoded),
                        None => out.push('\u{fffd}'),
                    }
                }
                Some(other) => out.push(other),
                None => break,
            },
            other => out.push(other),
        }
    }
    Some(out)
}
