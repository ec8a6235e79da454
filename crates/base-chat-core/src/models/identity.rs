// ABOUTME: User identities and their tenant-scoped profiles
// ABOUTME: Profiles carry the role a user holds inside one tenant
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;

/// A person known to the system, keyed by an external identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Local user id
    pub id: Uuid,
    /// Identity provider (`slack`, `widget`, `web`)
    pub identity_provider: String,
    /// Id assigned by the identity provider
    pub external_id: String,
    /// Display name, when known
    pub display_name: Option<String>,
    /// When the user was first seen
    pub created_at: DateTime<Utc>,
}

/// Role a user holds within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileRole {
    /// Tenant administrator
    Admin,
    /// Regular member
    User,
    /// Channel-originated or anonymous visitor
    Guest,
}

impl ProfileRole {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }
}

impl FromStr for ProfileRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            other => Err(format!("unknown profile role: {other}")),
        }
    }
}

/// Membership of a user in a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile id
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Linked user
    pub user_id: Uuid,
    /// Role inside the tenant
    pub role: ProfileRole,
    /// When the profile was created
    pub created_at: DateTime<Utc>,
}
