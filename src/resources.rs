// ABOUTME: Shared server resources handed to every route as axum state
// ABOUTME: Wires configuration, persistence, the chat engine and the Slack client once at startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppResult;
use crate::llm::ModelAdapter;
use crate::retrieval::{HttpRetriever, Retriever};
use crate::services::ChatEngine;
use crate::slack::{SignatureVerifier, SlackApi, SlackWebClient};

/// Everything a request handler needs, built once per process
#[derive(Clone)]
pub struct ServerResources {
    /// Process configuration
    pub config: Arc<ServerConfig>,
    /// Persistence handle
    pub database: Database,
    /// Turn orchestration shared by every surface
    pub engine: ChatEngine,
    /// Slack Web API client
    pub slack: Arc<dyn SlackApi>,
    /// `None` when no signing secret is configured
    pub slack_signature: Option<Arc<SignatureVerifier>>,
}

impl ServerResources {
    /// Assemble resources from already-built collaborators
    #[must_use]
    pub fn new(
        config: Arc<ServerConfig>,
        database: Database,
        retriever: Arc<dyn Retriever>,
        adapter: ModelAdapter,
        slack: Arc<dyn SlackApi>,
    ) -> Self {
        let engine = ChatEngine::new(database.clone(), retriever, adapter, &config);
        let slack_signature = config.slack.signing_secret.as_deref().map(|secret| {
            Arc::new(SignatureVerifier::new(
                secret,
                config.slack.signature_tolerance,
            ))
        });
        Self {
            config,
            database,
            engine,
            slack,
            slack_signature,
        }
    }

    /// Connect the database and build the production collaborators
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or an HTTP client
    /// cannot be built
    pub async fn from_config(config: Arc<ServerConfig>) -> AppResult<Self> {
        let database = Database::new(&config.database.to_connection_string()).await?;

        let retriever: Arc<dyn Retriever> = Arc::new(HttpRetriever::new(config.retrieval.clone())?);
        let adapter = ModelAdapter::from_config(&config.llm)?;
        let slack: Arc<dyn SlackApi> = Arc::new(SlackWebClient::new(
            &config.slack.api_base_url,
            config.llm.request_timeout,
        )?);

        info!(
            providers = adapter.providers().len(),
            slack_signing = config.slack.signing_secret.is_some(),
            "Server resources ready"
        );
        Ok(Self::new(config, database, retriever, adapter, slack))
    }
}
