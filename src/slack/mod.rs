// ABOUTME: Slack integration: typed webhook events, signature checks and Web API delivery
// ABOUTME: Replies are posted into the originating thread with cited sources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

mod client;
mod events;
mod format;
mod signature;

pub use client::{SlackApi, SlackPost, SlackWebClient};
pub use events::{EventCallback, InboundMessage, MessageEvent, SlackEnvelope, SlackEvent};
pub use format::{format_reply, to_mrkdwn};
pub use signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
