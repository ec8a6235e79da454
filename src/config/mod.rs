// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Exposes the explicit ServerConfig struct and its sections
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Configuration module for the Base Chat server

/// Environment and server configuration
pub mod environment;

pub use environment::{
    ChatConfig, DatabaseUrl, Environment, LlmConfig, LogLevel, RetrievalConfig, ServerConfig,
    SlackConfig,
};
