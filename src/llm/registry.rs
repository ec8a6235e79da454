// ABOUTME: Model registry mapping logical model ids to provider, temperature and output mode
// ABOUTME: Adding a model is a data entry; tenant resolution falls back to the default model
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use super::prompts::JSON_REPLY_INSTRUCTIONS;
use crate::errors::{AppError, AppResult};
use crate::models::Tenant;

/// Which provider serves a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `OpenAI` API
    OpenAi,
    /// Groq-hosted open models
    Groq,
    /// Google Gemini
    Gemini,
    /// Local `OpenAI`-compatible server
    Local,
}

/// How a model is made to return `{message, usedSourceIndexes}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredOutputMode {
    /// Provider enforces the JSON schema
    NativeSchema,
    /// Provider guarantees JSON but not the shape; instructions give the shape
    JsonMode,
    /// Plain completion; instructions give the shape and parsing is defensive
    PromptInstructed,
}

/// Registry entry for one logical model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    /// Logical id stored on messages and tenant settings
    pub id: String,
    /// Name shown in model pickers
    pub display_name: String,
    /// Serving provider
    pub provider: ProviderKind,
    /// Model name sent to the provider
    pub provider_model: String,
    /// Sampling temperature; `None` for models that reject it
    pub temperature: Option<f32>,
    /// Text appended to the system prompt for this model
    pub system_prompt_override: Option<String>,
    /// Structured output strategy
    pub structured_output: StructuredOutputMode,
    /// Whether partial replies can be streamed
    pub streams_partial: bool,
}

impl ModelSpec {
    /// Build an entry; non-native modes get the JSON reply instructions
    #[must_use]
    pub fn new(
        id: &str,
        display_name: &str,
        provider: ProviderKind,
        temperature: Option<f32>,
        structured_output: StructuredOutputMode,
        streams_partial: bool,
    ) -> Self {
        let system_prompt_override = match structured_output {
            StructuredOutputMode::NativeSchema => None,
            StructuredOutputMode::JsonMode | StructuredOutputMode::PromptInstructed => {
                Some(JSON_REPLY_INSTRUCTIONS.to_owned())
            }
        };
        Self {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            provider,
            provider_model: id.to_owned(),
            temperature,
            system_prompt_override,
            structured_output,
            streams_partial,
        }
    }
}

/// Table of known models
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSpec>,
}

impl ModelRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in model table
    #[must_use]
    pub fn with_defaults() -> Self {
        use StructuredOutputMode::{JsonMode, NativeSchema, PromptInstructed};

        let mut registry = Self::new();
        for spec in [
            ModelSpec::new("gpt-4o", "GPT-4o", ProviderKind::OpenAi, Some(0.2), NativeSchema, true),
            ModelSpec::new("gpt-4o-mini", "GPT-4o mini", ProviderKind::OpenAi, Some(0.2), NativeSchema, true),
            ModelSpec::new("o3-mini", "o3-mini", ProviderKind::OpenAi, None, NativeSchema, true),
            ModelSpec::new(
                "llama-3.3-70b-versatile",
                "Llama 3.3 70B",
                ProviderKind::Groq,
                Some(0.3),
                JsonMode,
                false,
            ),
            ModelSpec::new(
                "deepseek-r1-distill-llama-70b",
                "DeepSeek R1 Distill 70B",
                ProviderKind::Groq,
                Some(0.6),
                PromptInstructed,
                false,
            ),
            ModelSpec::new(
                "gemini-2.0-flash",
                "Gemini 2.0 Flash",
                ProviderKind::Gemini,
                Some(0.2),
                NativeSchema,
                true,
            ),
        ] {
            registry.register(spec);
        }
        registry
    }

    /// Add or replace a model
    pub fn register(&mut self, spec: ModelSpec) {
        self.models.insert(spec.id.clone(), spec);
    }

    /// Look up a model
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    /// All known models, sorted by id
    #[must_use]
    pub fn list(&self) -> Vec<&ModelSpec> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Pick the model for a turn
    ///
    /// A requested model that the tenant has not enabled is replaced by the
    /// tenant default.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting model id is not in the registry
    pub fn resolve_for_tenant(&self, tenant: &Tenant, requested: Option<&str>) -> AppResult<&ModelSpec> {
        let id = match requested {
            Some(model) if tenant.chatbot.is_model_enabled(model) => model,
            Some(model) => {
                warn!(
                    tenant_id = %tenant.id,
                    requested = model,
                    fallback = %tenant.chatbot.default_model,
                    "Requested model not enabled, using tenant default"
                );
                tenant.chatbot.default_model.as_str()
            }
            None => tenant.chatbot.default_model.as_str(),
        };

        self.get(id)
            .ok_or_else(|| AppError::invalid_input(format!("Unknown model '{id}'")))
    }
}
