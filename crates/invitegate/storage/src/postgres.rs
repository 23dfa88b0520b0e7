//! PostgreSQL adapter for invitegate storage.
//!
//! Each trait mutation maps to one conditional statement, so the database
//! serializes concurrent writers on the same `(user_id, group_id)` row.

use crate::model::{
    AdminCommandAppend, AdminCommandRecord, ConversationAppend, ConversationTurn, GroupId,
    GroupSettings, Membership, MessageId, NewMembership, TurnRole, UserId,
};
use crate::traits::{
    AdminAuditStore, ConversationStore, GroupSettingsStore, MembershipStore, QueryWindow,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

/// PostgreSQL-backed storage adapter.
#[derive(Clone)]
pub struct PostgresGatekeeperStorage {
    pool: PgPool,
}

impl PostgresGatekeeperStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS group_settings (
                group_id BIGINT PRIMARY KEY,
                required_users INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS memberships (
                user_id BIGINT NOT NULL,
                group_id BIGINT NOT NULL,
                username TEXT,
                inviter_id BIGINT,
                invited_count INTEGER NOT NULL DEFAULT 0,
                is_restricted BOOLEAN NOT NULL,
                joined_at TIMESTAMPTZ NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL,
                welcome_message_id BIGINT,
                PRIMARY KEY (user_id, group_id)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS memberships_restricted_idx
                ON memberships (group_id) WHERE is_restricted
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS admin_commands (
                id BIGSERIAL PRIMARY KEY,
                group_id BIGINT NOT NULL,
                admin_id BIGINT NOT NULL,
                command TEXT NOT NULL,
                parameters TEXT,
                executed_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS admin_commands_group_idx
                ON admin_commands (group_id, id DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversation_turns (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                group_id BIGINT NOT NULL,
                message_text TEXT NOT NULL,
                response_text TEXT,
                role TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS conversation_turns_pair_idx
                ON conversation_turns (user_id, group_id, created_at DESC)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS conversation_turns_created_idx
                ON conversation_turns (created_at)
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl GroupSettingsStore for PostgresGatekeeperStorage {
    async fn get_settings(&self, group_id: GroupId) -> StorageResult<Option<GroupSettings>> {
        let row = sqlx::query(
            r#"
            SELECT group_id, required_users, created_at, updated_at
              FROM group_settings
             WHERE group_id = $1
            "#,
        )
        .bind(group_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(settings_row).transpose()
    }

    async fn upsert_settings(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<GroupSettings> {
        let row = sqlx::query(
            r#"
            INSERT INTO group_settings (group_id, required_users, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (group_id) DO UPDATE
               SET required_users = EXCLUDED.required_users,
                   updated_at = EXCLUDED.updated_at
            RETURNING group_id, required_users, created_at, updated_at
            "#,
        )
        .bind(group_id.0)
        .bind(to_i32(required_users)?)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        settings_row(row)
    }

    async fn insert_settings_if_absent(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_settings (group_id, required_users, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (group_id) DO NOTHING
            "#,
        )
        .bind(group_id.0)
        .bind(to_i32(required_users)?)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl MembershipStore for PostgresGatekeeperStorage {
    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> StorageResult<Option<Membership>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, group_id, username, inviter_id, invited_count, is_restricted,
                   joined_at, last_updated, welcome_message_id
              FROM memberships
             WHERE user_id = $1 AND group_id = $2
            "#,
        )
        .bind(user_id.0)
        .bind(group_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(membership_row).transpose()
    }

    async fn insert_membership_if_absent(&self, membership: NewMembership) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO memberships
                (user_id, group_id, username, inviter_id, invited_count, is_restricted,
                 joined_at, last_updated, welcome_message_id)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $6, NULL)
            ON CONFLICT (user_id, group_id) DO NOTHING
            "#,
        )
        .bind(membership.user_id.0)
        .bind(membership.group_id.0)
        .bind(membership.username)
        .bind(membership.inviter_id.map(|id| id.0))
        .bind(membership.restricted)
        .bind(membership.joined_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_invited_count(
        &self,
        user_id: UserId,
        group_id: GroupId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<u32>> {
        let row = sqlx::query(
            r#"
            UPDATE memberships
               SET invited_count = invited_count + 1,
                   last_updated = $3
             WHERE user_id = $1 AND group_id = $2
            RETURNING invited_count
            "#,
        )
        .bind(user_id.0)
        .bind(group_id.0)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|r| {
            r.try_get::<i32, _>("invited_count")
                .map_err(|e| StorageError::Backend(e.to_string()))
                .and_then(from_i32)
        })
        .transpose()
    }

    async fn set_restricted(
        &self,
        user_id: UserId,
        group_id: GroupId,
        restricted: bool,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
               SET is_restricted = $3,
                   last_updated = $4
             WHERE user_id = $1 AND group_id = $2
               AND is_restricted <> $3
            "#,
        )
        .bind(user_id.0)
        .bind(group_id.0)
        .bind(restricted)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn swap_welcome_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        expected: Option<MessageId>,
        new: Option<MessageId>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
               SET welcome_message_id = $4,
                   last_updated = $5
             WHERE user_id = $1 AND group_id = $2
               AND welcome_message_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(user_id.0)
        .bind(group_id.0)
        .bind(expected.map(|id| id.0))
        .bind(new.map(|id| id.0))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_restricted(&self, group_id: GroupId) -> StorageResult<Vec<Membership>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, group_id, username, inviter_id, invited_count, is_restricted,
                   joined_at, last_updated, welcome_message_id
              FROM memberships
             WHERE group_id = $1 AND is_restricted
            "#,
        )
        .bind(group_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(membership_row).collect()
    }
}

#[async_trait]
impl AdminAuditStore for PostgresGatekeeperStorage {
    async fn append_admin_command(
        &self,
        entry: AdminCommandAppend,
    ) -> StorageResult<AdminCommandRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO admin_commands (group_id, admin_id, command, parameters, executed_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, group_id, admin_id, command, parameters, executed_at
            "#,
        )
        .bind(entry.group_id.0)
        .bind(entry.admin_id.0)
        .bind(entry.command)
        .bind(entry.parameters)
        .bind(entry.executed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        admin_command_row(row)
    }

    async fn list_admin_commands(
        &self,
        group_id: GroupId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AdminCommandRecord>> {
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, admin_id, command, parameters, executed_at
              FROM admin_commands
             WHERE group_id = $1
             ORDER BY id DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(group_id.0)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(admin_command_row).collect()
    }
}

#[async_trait]
impl ConversationStore for PostgresGatekeeperStorage {
    async fn append_turn(&self, turn: ConversationAppend) -> StorageResult<ConversationTurn> {
        let row = sqlx::query(
            r#"
            INSERT INTO conversation_turns
                (user_id, group_id, message_text, response_text, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, group_id, message_text, response_text, role, created_at
            "#,
        )
        .bind(turn.user_id.0)
        .bind(turn.group_id.0)
        .bind(turn.message_text)
        .bind(turn.response_text)
        .bind(turn.role.as_str())
        .bind(turn.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        turn_row(row)
    }

    async fn recent_turns(
        &self,
        user_id: UserId,
        group_id: GroupId,
        limit: usize,
    ) -> StorageResult<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, group_id, message_text, response_text, role, created_at
              FROM (
                    SELECT id, user_id, group_id, message_text, response_text, role, created_at
                      FROM conversation_turns
                     WHERE user_id = $1 AND group_id = $2
                     ORDER BY created_at DESC, id DESC
                     LIMIT $3
                   ) recent
             ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id.0)
        .bind(group_id.0)
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(turn_row).collect()
    }

    async fn purge_turns_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM conversation_turns WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn settings_row(row: PgRow) -> StorageResult<GroupSettings> {
    Ok(GroupSettings {
        group_id: GroupId(row.try_get("group_id").map_err(backend)?),
        required_users: from_i32(row.try_get("required_users").map_err(backend)?)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn membership_row(row: PgRow) -> StorageResult<Membership> {
    let inviter_id: Option<i64> = row.try_get("inviter_id").map_err(backend)?;
    let welcome_message_id: Option<i64> = row.try_get("welcome_message_id").map_err(backend)?;
    Ok(Membership {
        user_id: UserId(row.try_get("user_id").map_err(backend)?),
        group_id: GroupId(row.try_get("group_id").map_err(backend)?),
        username: row.try_get("username").map_err(backend)?,
        inviter_id: inviter_id.map(UserId),
        invited_count: from_i32(row.try_get("invited_count").map_err(backend)?)?,
        is_restricted: row.try_get("is_restricted").map_err(backend)?,
        joined_at: row.try_get("joined_at").map_err(backend)?,
        last_updated: row.try_get("last_updated").map_err(backend)?,
        welcome_message_id: welcome_message_id.map(MessageId),
    })
}

fn admin_command_row(row: PgRow) -> StorageResult<AdminCommandRecord> {
    Ok(AdminCommandRecord {
        id: row.try_get("id").map_err(backend)?,
        group_id: GroupId(row.try_get("group_id").map_err(backend)?),
        admin_id: UserId(row.try_get("admin_id").map_err(backend)?),
        command: row.try_get("command").map_err(backend)?,
        parameters: row.try_get("parameters").map_err(backend)?,
        executed_at: row.try_get("executed_at").map_err(backend)?,
    })
}

fn turn_row(row: PgRow) -> StorageResult<ConversationTurn> {
    let role: String = row.try_get("role").map_err(backend)?;
    Ok(ConversationTurn {
        id: row.try_get("id").map_err(backend)?,
        user_id: UserId(row.try_get("user_id").map_err(backend)?),
        group_id: GroupId(row.try_get("group_id").map_err(backend)?),
        message_text: row.try_get("message_text").map_err(backend)?,
        response_text: row.try_get("response_text").map_err(backend)?,
        role: role.parse::<TurnRole>()?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}

fn to_i32(value: u32) -> StorageResult<i32> {
    i32::try_from(value)
        .map_err(|_| StorageError::InvalidInput(format!("count {value} out of range")))
}

fn from_i32(value: i32) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative count {value} in storage")))
}
