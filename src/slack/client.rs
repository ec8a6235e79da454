// ABOUTME: Slack Web API client for posting thread replies and managing reactions
// ABOUTME: The SlackApi trait lets delivery run against a recording double in tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::errors::{AppError, AppResult};

const SERVICE: &str = "slack";

/// A message to post
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackPost {
    /// Channel id
    pub channel: String,
    /// Thread to reply in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// `mrkdwn` text
    pub text: String,
}

/// Slack Web API calls used for delivery
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// `chat.postMessage`
    async fn post_message(&self, token: &str, post: &SlackPost) -> AppResult<()>;

    /// `reactions.add`
    async fn add_reaction(&self, token: &str, channel: &str, ts: &str, name: &str) -> AppResult<()>;

    /// `reactions.remove`
    async fn remove_reaction(&self, token: &str, channel: &str, ts: &str, name: &str)
        -> AppResult<()>;
}

#[derive(Debug, Serialize)]
struct ReactionRequest<'a> {
    channel: &'a str,
    timestamp: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// `reqwest` implementation of [`SlackApi`]
pub struct SlackWebClient {
    client: Client,
    base_url: String,
}

impl SlackWebClient {
    /// Client for the Web API at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn call<B: Serialize + Sync>(
        &self,
        method: &str,
        token: &str,
        body: &B,
        tolerated: &[&str],
    ) -> AppResult<()> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::external_unavailable(SERVICE, format!("{method} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external_service(
                SERVICE,
                format!("{method} returned {status}"),
            ));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::external_service(SERVICE, format!("Invalid {method} response: {e}")))?;

        match (parsed.ok, parsed.error.as_deref()) {
            (true, _) => Ok(()),
            (false, Some(error)) if tolerated.contains(&error) => {
                debug!(method, error, "Ignoring benign Slack API error");
                Ok(())
            }
            (false, error) => {
                let error = error.unwrap_or("unknown_error");
                warn!(method, error, "Slack API call rejected");
                Err(AppError::external_service(SERVICE, format!("{method}: {error}")))
            }
        }
    }
}

#[async_trait]
impl SlackApi for SlackWebClient {
    #[instrument(skip(self, token, post), fields(channel = %post.channel))]
    async fn post_message(&self, token: &str, post: &SlackPost) -> AppResult<()> {
        self.call("chat.postMessage", token, post, &[]).await
    }

    #[instrument(skip(self, token))]
    async fn add_reaction(&self, token: &str, channel: &str, ts: &str, name: &str) -> AppResult<()> {
        let body = ReactionRequest {
            channel,
            timestamp: ts,
            name,
        };
        self.call("reactions.add", token, &body, &["already_reacted"]).await
    }

    #[instrument(skip(self, token))]
    async fn remove_reaction(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> AppResult<()> {
        let body = ReactionRequest {
            channel,
            timestamp: ts,
            name,
        };
        self.call("reactions.remove", token, &body, &["no_reaction"]).await
    }
}
