// ABOUTME: Tenant persistence with chatbot, search, Slack and billing columns
// ABOUTME: Lookups by id, Slack team and public chatbot id for the three entry points
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{column_error, parse_json, parse_uuid, to_json, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{
    BillingAccount, ChatbotSettings, PlanChange, SearchOptions, SearchOverridePermissions,
    SearchSettings, SlackChannelMode, SlackInstallation, Tenant, TenantId,
};

const TENANT_COLUMNS: &str = "id, name, slug, public_chatbot_id, grounding_prompt, \
    welcome_message, enabled_models, default_model, search_is_breadth, search_rerank, \
    search_prioritize_recent, override_breadth, override_rerank, override_prioritize_recent, \
    slack_team_id, slack_bot_token, slack_bot_user_id, slack_default_channel_mode, \
    slack_channel_modes, stripe_customer_id, orb_customer_id, plan_history, created_at, updated_at";

impl Database {
    pub(super) async fn migrate_tenants(&self) -> AppResult<()> {
        self.execute_ddl(
            r"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                public_chatbot_id TEXT NOT NULL UNIQUE,
                grounding_prompt TEXT,
                welcome_message TEXT,
                enabled_models TEXT NOT NULL DEFAULT '[]',
                default_model TEXT NOT NULL,
                search_is_breadth INTEGER NOT NULL DEFAULT 0,
                search_rerank INTEGER NOT NULL DEFAULT 0,
                search_prioritize_recent INTEGER NOT NULL DEFAULT 0,
                override_breadth INTEGER NOT NULL DEFAULT 0,
                override_rerank INTEGER NOT NULL DEFAULT 0,
                override_prioritize_recent INTEGER NOT NULL DEFAULT 0,
                slack_team_id TEXT UNIQUE,
                slack_bot_token TEXT,
                slack_bot_user_id TEXT,
                slack_default_channel_mode TEXT,
                slack_channel_modes TEXT NOT NULL DEFAULT '{}',
                stripe_customer_id TEXT,
                orb_customer_id TEXT,
                plan_history TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .await
    }

    /// Insert a tenant
    ///
    /// # Errors
    ///
    /// Returns a conflict error when the slug, chatbot id or Slack team is taken
    pub async fn create_tenant(&self, tenant: &Tenant) -> AppResult<()> {
        let slack = tenant.slack.as_ref();
        let channel_modes: HashMap<&str, &str> = slack
            .map(|s| {
                s.channel_modes
                    .iter()
                    .map(|(channel, mode)| (channel.as_str(), mode.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let query = format!(
            "INSERT INTO tenants ({TENANT_COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );

        sqlx::query(&query)
            .bind(tenant.id.to_string())
            .bind(&tenant.name)
            .bind(&tenant.slug)
            .bind(tenant.public_chatbot_id.to_string())
            .bind(&tenant.chatbot.grounding_prompt)
            .bind(&tenant.chatbot.welcome_message)
            .bind(to_json(&tenant.chatbot.enabled_models)?)
            .bind(&tenant.chatbot.default_model)
            .bind(tenant.search.defaults.is_breadth)
            .bind(tenant.search.defaults.rerank_enabled)
            .bind(tenant.search.defaults.prioritize_recent)
            .bind(tenant.search.overrides.breadth)
            .bind(tenant.search.overrides.rerank)
            .bind(tenant.search.overrides.prioritize_recent)
            .bind(slack.map(|s| s.team_id.clone()))
            .bind(slack.map(|s| s.bot_token.clone()))
            .bind(slack.and_then(|s| s.bot_user_id.clone()))
            .bind(slack.map(|s| s.default_channel_mode.as_str()))
            .bind(to_json(&channel_modes)?)
            .bind(&tenant.billing.stripe_customer_id)
            .bind(&tenant.billing.orb_customer_id)
            .bind(to_json(&tenant.billing.plan_history)?)
            .bind(tenant.created_at.to_rfc3339())
            .bind(tenant.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    AppError::conflict(format!("Tenant already exists: {}", tenant.slug))
                }
                _ => AppError::database(format!("Failed to create tenant: {e}")),
            })?;

        Ok(())
    }

    /// Get a tenant by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_tenant(&self, tenant_id: TenantId) -> AppResult<Option<Tenant>> {
        self.fetch_tenant("id", tenant_id.to_string()).await
    }

    /// Get the tenant that installed the bot into a Slack workspace
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_tenant_by_slack_team(&self, team_id: &str) -> AppResult<Option<Tenant>> {
        self.fetch_tenant("slack_team_id", team_id.to_owned()).await
    }

    /// Get a tenant by its public chatbot id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_tenant_by_chatbot_id(&self, chatbot_id: Uuid) -> AppResult<Option<Tenant>> {
        self.fetch_tenant("public_chatbot_id", chatbot_id.to_string())
            .await
    }

    async fn fetch_tenant(&self, column: &'static str, value: String) -> AppResult<Option<Tenant>> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE {column} = ?");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get tenant: {e}")))?;

        row.as_ref().map(row_to_tenant).transpose()
    }
}

fn row_to_tenant(row: &SqliteRow) -> AppResult<Tenant> {
    let text = |column: &str| -> AppResult<String> {
        row.try_get::<String, _>(column)
            .map_err(|e| column_error(column, &e))
    };
    let opt_text = |column: &str| -> AppResult<Option<String>> {
        row.try_get::<Option<String>, _>(column)
            .map_err(|e| column_error(column, &e))
    };
    let flag = |column: &str| -> AppResult<bool> {
        row.try_get::<bool, _>(column)
            .map_err(|e| column_error(column, &e))
    };

    let slack = match opt_text("slack_team_id")? {
        Some(team_id) => {
            let raw_modes: HashMap<String, String> =
                parse_json(&text("slack_channel_modes")?, "slack_channel_modes")?;
            let mut channel_modes = HashMap::with_capacity(raw_modes.len());
            for (channel, mode) in raw_modes {
                let mode = mode.parse::<SlackChannelMode>().map_err(AppError::database)?;
                channel_modes.insert(channel, mode);
            }
            let default_channel_mode = opt_text("slack_default_channel_mode")?
                .map(|m| m.parse::<SlackChannelMode>())
                .transpose()
                .map_err(AppError::database)?
                .unwrap_or_default();

            Some(SlackInstallation {
                team_id,
                bot_token: opt_text("slack_bot_token")?.unwrap_or_default(),
                bot_user_id: opt_text("slack_bot_user_id")?,
                default_channel_mode,
                channel_modes,
            })
        }
        None => None,
    };

    let plan_history: Vec<PlanChange> = parse_json(&text("plan_history")?, "plan_history")?;

    Ok(Tenant {
        id: TenantId::from_uuid(parse_uuid(&text("id")?, "id")?),
        name: text("name")?,
        slug: text("slug")?,
        public_chatbot_id: parse_uuid(&text("public_chatbot_id")?, "public_chatbot_id")?,
        chatbot: ChatbotSettings {
            grounding_prompt: opt_text("grounding_prompt")?,
            welcome_message: opt_text("welcome_message")?,
            enabled_models: parse_json(&text("enabled_models")?, "enabled_models")?,
            default_model: text("default_model")?,
        },
        search: SearchSettings {
            defaults: SearchOptions {
                is_breadth: flag("search_is_breadth")?,
                rerank_enabled: flag("search_rerank")?,
                prioritize_recent: flag("search_prioritize_recent")?,
            },
            overrides: SearchOverridePermissions {
                breadth: flag("override_breadth")?,
                rerank: flag("override_rerank")?,
                prioritize_recent: flag("override_prioritize_recent")?,
            },
        },
        slack,
        billing: BillingAccount {
            stripe_customer_id: opt_text("stripe_customer_id")?,
            orb_customer_id: opt_text("orb_customer_id")?,
            plan_history,
        },
        created_at: parse_timestamp(&text("created_at")?, "created_at")?,
        updated_at: parse_timestamp(&text("updated_at")?, "updated_at")?,
    })
}

/// Parse an RFC 3339 TEXT timestamp
pub(super) fn parse_timestamp(raw: &str, column: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Invalid timestamp in column {column}: {e}")))
}
