// ABOUTME: User and profile persistence keyed by external identity
// ABOUTME: Find-or-create operations are idempotent under concurrent sign-ins
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::tenants::parse_timestamp;
use super::{column_error, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Profile, ProfileRole, TenantId, User};

impl Database {
    pub(super) async fn migrate_users(&self) -> AppResult<()> {
        self.execute_ddl(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                identity_provider TEXT NOT NULL,
                external_id TEXT NOT NULL,
                display_name TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(identity_provider, external_id)
            )
            ",
        )
        .await?;

        self.execute_ddl(
            r"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, user_id)
            )
            ",
        )
        .await
    }

    /// Find the user for an external identity, creating it on first sight
    ///
    /// Concurrent callers with the same identity converge on one row: the
    /// insert is a no-op when the identity already exists and the follow-up
    /// select reads whichever row won.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn find_or_create_user(
        &self,
        identity_provider: &str,
        external_id: &str,
        display_name: Option<&str>,
    ) -> AppResult<User> {
        sqlx::query(
            r"
            INSERT INTO users (id, identity_provider, external_id, display_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(identity_provider, external_id) DO NOTHING
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(identity_provider)
        .bind(external_id)
        .bind(display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create user: {e}")))?;

        let row = sqlx::query(
            r"
            SELECT id, identity_provider, external_id, display_name, created_at
            FROM users
            WHERE identity_provider = ? AND external_id = ?
            ",
        )
        .bind(identity_provider)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?;

        row_to_user(&row)
    }

    /// Find the profile linking `user_id` to `tenant_id`, creating it with
    /// `role` when missing
    ///
    /// An existing profile keeps its role.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn find_or_create_profile(
        &self,
        tenant_id: TenantId,
        user_id: Uuid,
        role: ProfileRole,
    ) -> AppResult<Profile> {
        sqlx::query(
            r"
            INSERT INTO profiles (id, tenant_id, user_id, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, user_id) DO NOTHING
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create profile: {e}")))?;

        let row = sqlx::query(
            r"
            SELECT id, tenant_id, user_id, role, created_at
            FROM profiles
            WHERE tenant_id = ? AND user_id = ?
            ",
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get profile: {e}")))?;

        row_to_profile(&row)
    }

    /// Get a profile within a tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_profile(
        &self,
        tenant_id: TenantId,
        profile_id: Uuid,
    ) -> AppResult<Option<Profile>> {
        let row = sqlx::query(
            r"
            SELECT id, tenant_id, user_id, role, created_at
            FROM profiles
            WHERE id = ? AND tenant_id = ?
            ",
        )
        .bind(profile_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get profile: {e}")))?;

        row.as_ref().map(row_to_profile).transpose()
    }

    /// Count users registered for an identity provider
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn count_users(&self, identity_provider: &str) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE identity_provider = ?")
            .bind(identity_provider)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count users: {e}")))
    }

    /// Count profiles in a tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn count_profiles(&self, tenant_id: TenantId) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count profiles: {e}")))
    }
}

fn row_to_user(row: &SqliteRow) -> AppResult<User> {
    let id: String = row.try_get("id").map_err(|e| column_error("id", &e))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| column_error("created_at", &e))?;

    Ok(User {
        id: parse_uuid(&id, "id")?,
        identity_provider: row
            .try_get("identity_provider")
            .map_err(|e| column_error("identity_provider", &e))?,
        external_id: row
            .try_get("external_id")
            .map_err(|e| column_error("external_id", &e))?,
        display_name: row
            .try_get("display_name")
            .map_err(|e| column_error("display_name", &e))?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

fn row_to_profile(row: &SqliteRow) -> AppResult<Profile> {
    let get = |column: &str| -> AppResult<String> {
        row.try_get::<String, _>(column)
            .map_err(|e| column_error(column, &e))
    };

    Ok(Profile {
        id: parse_uuid(&get("id")?, "id")?,
        tenant_id: TenantId::from_uuid(parse_uuid(&get("tenant_id")?, "tenant_id")?),
        user_id: parse_uuid(&get("user_id")?, "user_id")?,
        role: get("role")?
            .parse::<ProfileRole>()
            .map_err(AppError::database)?,
        created_at: parse_timestamp(&get("created_at")?, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatbotSettings, Tenant};

    async fn seeded() -> (Database, Tenant) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let tenant = Tenant::new(
            "Acme".to_owned(),
            "acme".to_owned(),
            ChatbotSettings {
                grounding_prompt: None,
                welcome_message: None,
                enabled_models: vec![],
                default_model: "gpt-4o".to_owned(),
            },
        );
        db.create_tenant(&tenant).await.unwrap();
        (db, tenant)
    }

    #[tokio::test]
    async fn test_find_or_create_user_is_idempotent() {
        let (db, _) = seeded().await;
        let first = db
            .find_or_create_user("slack", "T1:U1", Some("Ada"))
            .await
            .unwrap();
        let second = db.find_or_create_user("slack", "T1:U1", None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Ada"));
        assert_eq!(db.count_users("slack").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_profile_keeps_original_role() {
        let (db, tenant) = seeded().await;
        let user = db.find_or_create_user("web", "u-1", None).await.unwrap();

        let created = db
            .find_or_create_profile(tenant.id, user.id, ProfileRole::Admin)
            .await
            .unwrap();
        let again = db
            .find_or_create_profile(tenant.id, user.id, ProfileRole::Guest)
            .await
            .unwrap();

        assert_eq!(created.id, again.id);
        assert_eq!(again.role, ProfileRole::Admin);
        assert_eq!(db.count_profiles(tenant.id).await.unwrap(), 1);

        let fetched = db.get_profile(tenant.id, created.id).await.unwrap();
        assert_eq!(fetched, Some(created));
        assert!(db
            .get_profile(TenantId::new(), again.id)
            .await
            .unwrap()
            .is_none());
    }
}
