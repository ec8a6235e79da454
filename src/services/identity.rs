// ABOUTME: Sign-in by external identity for Slack users and anonymous widget sessions
// ABOUTME: Repeated or concurrent calls converge on the same user and guest profile
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Profile, ProfileRole, Tenant};

/// Identity provider name for Slack users
pub const SLACK_PROVIDER: &str = "slack";

/// Identity provider name for anonymous widget sessions
pub const WIDGET_PROVIDER: &str = "widget";

/// Resolve the tenant and guest profile for a Slack user
///
/// # Errors
///
/// Returns `UnknownTenant` if no tenant has installed the Slack team, or a
/// database error
#[instrument(skip(database))]
pub async fn slack_sign_in(
    database: &Database,
    team_id: &str,
    user_id: &str,
) -> AppResult<(Tenant, Profile)> {
    let tenant = database
        .get_tenant_by_slack_team(team_id)
        .await?
        .ok_or_else(|| AppError::unknown_tenant(team_id))?;

    let user = database
        .find_or_create_user(SLACK_PROVIDER, user_id, None)
        .await?;
    let profile = database
        .find_or_create_profile(tenant.id, user.id, ProfileRole::Guest)
        .await?;

    debug!(tenant_id = %tenant.id, profile_id = %profile.id, "Slack user signed in");
    Ok((tenant, profile))
}

/// Resolve the tenant and guest profile for an anonymous widget session
///
/// # Errors
///
/// Returns `UnknownTenant` if the chatbot id is not published by any
/// tenant, or a database error
#[instrument(skip(database, session_id))]
pub async fn widget_sign_in(
    database: &Database,
    chatbot_id: Uuid,
    session_id: &str,
) -> AppResult<(Tenant, Profile)> {
    let tenant = database
        .get_tenant_by_chatbot_id(chatbot_id)
        .await?
        .ok_or_else(|| AppError::unknown_tenant(chatbot_id.to_string()))?;

    let external_id = format!("{chatbot_id}:{session_id}");
    let user = database
        .find_or_create_user(WIDGET_PROVIDER, &external_id, None)
        .await?;
    let profile = database
        .find_or_create_profile(tenant.id, user.id, ProfileRole::Guest)
        .await?;
    Ok((tenant, profile))
}
