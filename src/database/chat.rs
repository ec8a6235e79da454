// ABOUTME: Database operations for conversations and their ordered messages
// ABOUTME: Assistant placeholders are finalized exactly once through a guarded update
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::tenants::parse_timestamp;
use super::{column_error, parse_json, parse_json_opt, parse_uuid, to_json, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Conversation, Message, MessageRole, NewMessage, Source, TenantId};

const MESSAGE_COLUMNS: &str = "seq, id, tenant_id, conversation_id, role, content, sources, \
    model, search_options, agentic_info, created_at";

const CONVERSATION_COLUMNS: &str =
    "id, tenant_id, profile_id, title, slack_thread_key, created_at, updated_at";

// ============================================================================
// Schema
// ============================================================================

impl Database {
    pub(super) async fn migrate_chat(&self) -> AppResult<()> {
        self.execute_ddl(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                slack_thread_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, slack_thread_key)
            )
            ",
        )
        .await?;

        // seq is the storage-assigned ordering key; timestamps can tie
        self.execute_ddl(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant')),
                content TEXT,
                sources TEXT NOT NULL DEFAULT '[]',
                model TEXT,
                search_options TEXT,
                agentic_info TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .await?;

        self.execute_ddl(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
             ON messages(tenant_id, conversation_id, seq)",
        )
        .await?;

        self.execute_ddl(
            "CREATE INDEX IF NOT EXISTS idx_conversations_profile \
             ON conversations(tenant_id, profile_id, updated_at DESC)",
        )
        .await
    }
}

// ============================================================================
// Conversations
// ============================================================================

impl Database {
    /// Create a conversation for a profile
    ///
    /// # Errors
    ///
    /// Returns a conflict error if a conversation already exists for the
    /// Slack thread, or a database error otherwise
    pub async fn create_conversation(
        &self,
        tenant_id: TenantId,
        profile_id: Uuid,
        title: &str,
        slack_thread_key: Option<&str>,
    ) -> AppResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            tenant_id,
            profile_id,
            title: title.to_owned(),
            slack_thread_key: slack_thread_key.map(str::to_owned),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r"
            INSERT INTO conversations (id, tenant_id, profile_id, title, slack_thread_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(conversation.id.to_string())
        .bind(tenant_id.to_string())
        .bind(profile_id.to_string())
        .bind(&conversation.title)
        .bind(&conversation.slack_thread_key)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::conflict("Conversation already exists for this thread")
            }
            _ => AppError::database(format!("Failed to create conversation: {e}")),
        })?;

        Ok(conversation)
    }

    /// Get a conversation within a tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_conversation(
        &self,
        tenant_id: TenantId,
        conversation_id: Uuid,
    ) -> AppResult<Option<Conversation>> {
        let query =
            format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ? AND tenant_id = ?");
        let row = sqlx::query(&query)
            .bind(conversation_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    /// Find the conversation mirroring a Slack thread
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn find_conversation_by_slack_thread(
        &self,
        tenant_id: TenantId,
        thread_key: &str,
    ) -> AppResult<Option<Conversation>> {
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE tenant_id = ? AND slack_thread_key = ?"
        );
        let row = sqlx::query(&query)
            .bind(tenant_id.to_string())
            .bind(thread_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    /// Rename a conversation
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation does not exist or the update fails
    pub async fn update_conversation_title(
        &self,
        tenant_id: TenantId,
        conversation_id: Uuid,
        title: &str,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(title)
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update conversation: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Conversation {conversation_id}")));
        }
        Ok(())
    }

    /// List a profile's conversations, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn list_conversations(
        &self,
        tenant_id: TenantId,
        profile_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<Conversation>> {
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE tenant_id = ? AND profile_id = ? ORDER BY updated_at DESC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(tenant_id.to_string())
            .bind(profile_id.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        rows.iter().map(row_to_conversation).collect()
    }
}

// ============================================================================
// Messages
// ============================================================================

impl Database {
    /// Insert a message and return it with its assigned sequence
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn create_message(&self, message: &NewMessage) -> AppResult<Message> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query(
            r"
            INSERT INTO messages (id, tenant_id, conversation_id, role, content, sources, model, search_options, agentic_info, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(id.to_string())
        .bind(message.tenant_id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(to_json(&message.sources)?)
        .bind(&message.model)
        .bind(message.search_options.as_ref().map(to_json).transpose()?)
        .bind(message.agentic_info.as_ref().map(to_json).transpose()?)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create message: {e}")))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND tenant_id = ?")
            .bind(now.to_rfc3339())
            .bind(message.conversation_id.to_string())
            .bind(message.tenant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to touch conversation: {e}")))?;

        Ok(Message {
            id,
            tenant_id: message.tenant_id,
            conversation_id: message.conversation_id,
            sequence: result.last_insert_rowid(),
            role: message.role,
            content: message.content.clone(),
            sources: message.sources.clone(),
            model: message.model.clone(),
            search_options: message.search_options,
            agentic_info: message.agentic_info.clone(),
            created_at: now,
        })
    }

    /// Finalize an assistant placeholder with its content and sources
    ///
    /// Only a row whose content is still null is updated, so a message can be
    /// finalized once.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if the message is missing or already
    /// finalized, or a database error if the update fails
    pub async fn update_message_content(
        &self,
        tenant_id: TenantId,
        conversation_id: Uuid,
        message_id: Uuid,
        content: &str,
        sources: Option<&[Source]>,
    ) -> AppResult<()> {
        let sources_json = sources.map(to_json).transpose()?;

        let result = sqlx::query(
            r"
            UPDATE messages
            SET content = ?, sources = COALESCE(?, sources)
            WHERE id = ? AND tenant_id = ? AND conversation_id = ? AND content IS NULL
            ",
        )
        .bind(content)
        .bind(sources_json)
        .bind(message_id.to_string())
        .bind(tenant_id.to_string())
        .bind(conversation_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update message: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!(
                "Message {message_id} is not an open placeholder"
            ))
            .with_resource_id(message_id.to_string()));
        }
        Ok(())
    }

    /// Delete an assistant placeholder that will never be shown
    ///
    /// Only open placeholders can be discarded; finalized rows are history.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if no open placeholder matches, or a
    /// database error if the delete fails
    pub async fn discard_message(
        &self,
        tenant_id: TenantId,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r"
            DELETE FROM messages
            WHERE id = ? AND tenant_id = ? AND conversation_id = ?
              AND role = 'assistant' AND content IS NULL
            ",
        )
        .bind(message_id.to_string())
        .bind(tenant_id.to_string())
        .bind(conversation_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to discard message: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!(
                "Message {message_id} is not an open placeholder"
            ))
            .with_resource_id(message_id.to_string()));
        }
        Ok(())
    }

    /// Get every message of a conversation in insertion order
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_messages_for_conversation(
        &self,
        tenant_id: TenantId,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE tenant_id = ? AND conversation_id = ? ORDER BY seq ASC"
        );
        let rows = sqlx::query(&query)
            .bind(tenant_id.to_string())
            .bind(conversation_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        rows.iter().map(row_to_message).collect()
    }

    /// Get a single message within a tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_message(
        &self,
        tenant_id: TenantId,
        message_id: Uuid,
    ) -> AppResult<Option<Message>> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ? AND tenant_id = ?");
        let row = sqlx::query(&query)
            .bind(message_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get message: {e}")))?;

        row.as_ref().map(row_to_message).transpose()
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn row_to_conversation(row: &SqliteRow) -> AppResult<Conversation> {
    let get = |column: &str| -> AppResult<String> {
        row.try_get::<String, _>(column)
            .map_err(|e| column_error(column, &e))
    };

    Ok(Conversation {
        id: parse_uuid(&get("id")?, "id")?,
        tenant_id: TenantId::from_uuid(parse_uuid(&get("tenant_id")?, "tenant_id")?),
        profile_id: parse_uuid(&get("profile_id")?, "profile_id")?,
        title: get("title")?,
        slack_thread_key: row
            .try_get("slack_thread_key")
            .map_err(|e| column_error("slack_thread_key", &e))?,
        created_at: parse_timestamp(&get("created_at")?, "created_at")?,
        updated_at: parse_timestamp(&get("updated_at")?, "updated_at")?,
    })
}

fn row_to_message(row: &SqliteRow) -> AppResult<Message> {
    let get = |column: &str| -> AppResult<String> {
        row.try_get::<String, _>(column)
            .map_err(|e| column_error(column, &e))
    };
    let get_opt = |column: &str| -> AppResult<Option<String>> {
        row.try_get::<Option<String>, _>(column)
            .map_err(|e| column_error(column, &e))
    };

    Ok(Message {
        id: parse_uuid(&get("id")?, "id")?,
        tenant_id: TenantId::from_uuid(parse_uuid(&get("tenant_id")?, "tenant_id")?),
        conversation_id: parse_uuid(&get("conversation_id")?, "conversation_id")?,
        sequence: row.try_get("seq").map_err(|e| column_error("seq", &e))?,
        role: get("role")?
            .parse::<MessageRole>()
            .map_err(AppError::database)?,
        content: get_opt("content")?,
        sources: parse_json(&get("sources")?, "sources")?,
        model: get_opt("model")?,
        search_options: parse_json_opt(get_opt("search_options")?, "search_options")?,
        agentic_info: parse_json_opt(get_opt("agentic_info")?, "agentic_info")?,
        created_at: parse_timestamp(&get("created_at")?, "created_at")?,
    })
}
