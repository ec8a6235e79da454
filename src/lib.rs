// ABOUTME: Main library entry point for the Base Chat conversation orchestration engine
// ABOUTME: Grounded replies over a tenant knowledge base for web, widget and Slack surfaces
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

#![deny(unsafe_code)]

//! # Base Chat
//!
//! A multi-tenant chat engine that answers questions from an organization's
//! knowledge base and cites the documents it used.
//!
//! ## Architecture
//!
//! - **Retrieval**: scored chunks from the external search backend
//! - **Prompt assembly**: tenant grounding template, history and numbered
//!   sources
//! - **Model adapter**: one structured-reply contract over OpenAI, Groq and
//!   Gemini
//! - **Reply generator**: placeholder row, generation, exactly-once finalize
//! - **Surfaces**: streamed web replies, the anonymous widget and Slack
//!   threads, all driven by the same conversation context
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use base_chat::config::ServerConfig;
//! use base_chat::resources::ServerResources;
//! use base_chat::server::ChatServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ServerConfig::from_env()?);
//!     let resources = Arc::new(ServerResources::from_config(config).await?);
//!     ChatServer::new(resources).run().await
//! }
//! ```

/// Configuration management
pub mod config;

/// SQLite persistence for tenants, identities and conversations
pub mod database;

/// Unified error types
pub mod errors;

/// Model providers, registry and structured replies
pub mod llm;

/// Logging configuration and structured logging
pub mod logging;

/// HTTP middleware
pub mod middleware;

/// Domain models
pub mod models;

/// Prompt assembly
pub mod prompt;

/// Shared server resources
pub mod resources;

/// Knowledge base retrieval
pub mod retrieval;

/// HTTP routes
pub mod routes;

/// HTTP server
pub mod server;

/// Domain services
pub mod services;

/// Slack integration
pub mod slack;

/// Test fixtures and scripted collaborators
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
