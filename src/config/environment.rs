// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Builds the single ServerConfig value that is passed to every component
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! Environment-based configuration
//!
//! [`ServerConfig::from_env`] is the only place that reads process
//! environment. Every component receives the section it needs by reference.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// Strongly typed log level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational (default)
    #[default]
    Info,
    /// Debug output
    Debug,
    /// Everything
    Trace,
}

impl LogLevel {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Automated tests
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
            Self::Testing => f.write_str("testing"),
        }
    }
}

/// Type-safe database location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseUrl {
    /// `SQLite` database file
    SQLite {
        /// Path to the database file
        path: PathBuf,
    },
    /// In-memory `SQLite` (tests and demos)
    Memory,
}

impl DatabaseUrl {
    /// Parse from a `sqlite:` URL or a bare file path
    #[must_use]
    pub fn parse_url(s: &str) -> Self {
        let path_str = s.strip_prefix("sqlite:").unwrap_or(s);
        let path_str = path_str.strip_prefix("//").unwrap_or(path_str);
        if path_str == ":memory:" || path_str.is_empty() {
            Self::Memory
        } else {
            Self::SQLite {
                path: PathBuf::from(path_str),
            }
        }
    }

    /// Convert to connection string
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            Self::SQLite { path } => format!("sqlite:{}", path.display()),
            Self::Memory => "sqlite::memory:".to_owned(),
        }
    }

    /// Check if this is an in-memory database
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::SQLite {
            path: PathBuf::from("./data/base-chat.db"),
        }
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_connection_string())
    }
}

/// LLM provider credentials and endpoints
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// `OpenAI` API key
    pub openai_api_key: Option<String>,
    /// `OpenAI` API base URL
    pub openai_base_url: String,
    /// Groq API key
    pub groq_api_key: Option<String>,
    /// Groq API base URL
    pub groq_base_url: String,
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Gemini API base URL
    pub gemini_base_url: String,
    /// Local `OpenAI`-compatible server (Ollama, vLLM)
    pub local_base_url: Option<String>,
    /// Per-request timeout for completions
    pub request_timeout: Duration,
}

/// Hosted retrieval backend settings
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Backend base URL
    pub base_url: String,
    /// Bearer key
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Chunks requested in depth mode
    pub depth_top_k: u32,
    /// Chunks requested in breadth or rerank mode
    pub breadth_top_k: u32,
}

/// Slack integration settings
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Signing secret for webhook verification; `None` disables the webhook
    pub signing_secret: Option<String>,
    /// Web API base URL
    pub api_base_url: String,
    /// Reaction shown while a reply is being generated
    pub thinking_emoji: String,
    /// Model used for the qualification gates
    pub gate_model: String,
    /// Time budget for each gate call
    pub gate_timeout: Duration,
    /// Maximum accepted age of a signed request
    pub signature_tolerance: Duration,
}

/// Conversation behaviour settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Content written when generation fails
    pub fallback_message: String,
    /// Model used for conversation naming
    pub title_model: String,
    /// Number of prior messages included in prompts
    pub history_window: usize,
}

/// Complete server configuration, built once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Log level
    pub log_level: LogLevel,
    /// Database location
    pub database: DatabaseUrl,
    /// Allowed CORS origins (`*` for any)
    pub cors_origins: Vec<String>,
    /// LLM providers
    pub llm: LlmConfig,
    /// Retrieval backend
    pub retrieval: RetrievalConfig,
    /// Slack integration
    pub slack: SlackConfig,
    /// Conversation behaviour
    pub chat: ChatConfig,
}

/// Default content for failed generations
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I wasn't able to generate a response. Please try again.";

impl ServerConfig {
    /// Load configuration from the process environment (and `.env`)
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");

        if let Err(e) = dotenvy::dotenv() {
            warn!("No .env file found or failed to load: {e}");
        }

        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit variable map
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed
    pub fn from_vars(vars: &HashMap<String, String>) -> AppResult<Self> {
        let lookup = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        Ok(Self {
            host: var_or("HOST", "127.0.0.1"),
            http_port: parse_var(vars, "HTTP_PORT", 8081)?,
            environment: Environment::from_str_or_default(&var_or("ENVIRONMENT", "development")),
            log_level: LogLevel::from_str_or_default(&var_or("LOG_LEVEL", "info")),
            database: DatabaseUrl::parse_url(&var_or(
                "DATABASE_URL",
                "sqlite:./data/base-chat.db",
            )),
            cors_origins: parse_origins(&var_or("CORS_ORIGINS", "*")),
            llm: LlmConfig {
                openai_api_key: lookup("OPENAI_API_KEY"),
                openai_base_url: var_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                groq_api_key: lookup("GROQ_API_KEY"),
                groq_base_url: var_or("GROQ_BASE_URL", "https://api.groq.com/openai/v1"),
                gemini_api_key: lookup("GEMINI_API_KEY"),
                gemini_base_url: var_or(
                    "GEMINI_BASE_URL",
                    "https://generativelanguage.googleapis.com/v1beta",
                ),
                local_base_url: lookup("LOCAL_LLM_BASE_URL"),
                request_timeout: Duration::from_secs(parse_var(
                    vars,
                    "LLM_REQUEST_TIMEOUT_SECS",
                    120,
                )?),
            },
            retrieval: RetrievalConfig {
                base_url: var_or("RETRIEVAL_BASE_URL", "https://api.ragie.ai"),
                api_key: lookup("RETRIEVAL_API_KEY"),
                timeout: Duration::from_secs(parse_var(vars, "RETRIEVAL_TIMEOUT_SECS", 30)?),
                depth_top_k: parse_var(vars, "RETRIEVAL_DEPTH_TOP_K", 6)?,
                breadth_top_k: parse_var(vars, "RETRIEVAL_BREADTH_TOP_K", 100)?,
            },
            slack: SlackConfig {
                signing_secret: lookup("SLACK_SIGNING_SECRET"),
                api_base_url: var_or("SLACK_API_BASE_URL", "https://slack.com/api"),
                thinking_emoji: var_or("SLACK_THINKING_EMOJI", "thinking_face"),
                gate_model: var_or("SLACK_GATE_MODEL", "gpt-4o-mini"),
                gate_timeout: Duration::from_secs(parse_var(vars, "SLACK_GATE_TIMEOUT_SECS", 10)?),
                signature_tolerance: Duration::from_secs(parse_var(
                    vars,
                    "SLACK_SIGNATURE_TOLERANCE_SECS",
                    300,
                )?),
            },
            chat: ChatConfig {
                fallback_message: var_or("CHAT_FALLBACK_MESSAGE", DEFAULT_FALLBACK_MESSAGE),
                title_model: var_or("CHAT_TITLE_MODEL", "gpt-4o-mini"),
                history_window: parse_var(vars, "CHAT_HISTORY_WINDOW", 20)?,
            },
        })
    }

    /// Log a one-line summary without secrets
    pub fn log_summary(&self) {
        info!(
            host = %self.host,
            http_port = self.http_port,
            environment = %self.environment,
            database = %self.database,
            openai = self.llm.openai_api_key.is_some(),
            groq = self.llm.groq_api_key.is_some(),
            gemini = self.llm.gemini_api_key.is_some(),
            slack_webhook = self.slack.signing_secret.is_some(),
            "Configuration loaded"
        );
    }
}

/// Parse a numeric variable, falling back to `default` when unset
fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::config(format!("Invalid {key} value '{raw}': {e}"))),
        None => Ok(default),
    }
}

/// Parse comma-separated CORS origins
fn parse_origins(origins_str: &str) -> Vec<String> {
    if origins_str.trim() == "*" {
        vec!["*".to_owned()]
    } else {
        origins_str
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
