//! In-memory reference implementation of the invitegate storage traits.
//!
//! Each mutation runs under a single write lock, which gives the same
//! per-statement atomicity the PostgreSQL backend gets from the database.
//! Intended for tests and single-process development runs.

use crate::model::{
    AdminCommandAppend, AdminCommandRecord, ConversationAppend, ConversationTurn, GroupId,
    GroupSettings, Membership, MessageId, NewMembership, UserId,
};
use crate::traits::{
    AdminAuditStore, ConversationStore, GroupSettingsStore, MembershipStore, QueryWindow,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory gatekeeper storage adapter.
#[derive(Default)]
pub struct InMemoryGatekeeperStorage {
    settings: RwLock<HashMap<GroupId, GroupSettings>>,
    memberships: RwLock<HashMap<(UserId, GroupId), Membership>>,
    admin_commands: RwLock<Vec<AdminCommandRecord>>,
    turns: RwLock<Vec<ConversationTurn>>,
}

impl InMemoryGatekeeperStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(what: &str) -> StorageError {
    StorageError::Backend(format!("{what} lock poisoned"))
}

#[async_trait]
impl GroupSettingsStore for InMemoryGatekeeperStorage {
    async fn get_settings(&self, group_id: GroupId) -> StorageResult<Option<GroupSettings>> {
        let guard = self.settings.read().map_err(|_| poisoned("settings"))?;
        Ok(guard.get(&group_id).cloned())
    }

    async fn upsert_settings(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<GroupSettings> {
        let mut guard = self.settings.write().map_err(|_| poisoned("settings"))?;
        let entry = guard.entry(group_id).or_insert_with(|| GroupSettings {
            group_id,
            required_users,
            created_at: at,
            updated_at: at,
        });
        entry.required_users = required_users;
        entry.updated_at = at;
        Ok(entry.clone())
    }

    async fn insert_settings_if_absent(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut guard = self.settings.write().map_err(|_| poisoned("settings"))?;
        if guard.contains_key(&group_id) {
            return Ok(false);
        }
        guard.insert(
            group_id,
            GroupSettings {
                group_id,
                required_users,
                created_at: at,
                updated_at: at,
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl MembershipStore for InMemoryGatekeeperStorage {
    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> StorageResult<Option<Membership>> {
        let guard = self.memberships.read().map_err(|_| poisoned("membership"))?;
        Ok(guard.get(&(user_id, group_id)).cloned())
    }

    async fn insert_membership_if_absent(&self, membership: NewMembership) -> StorageResult<bool> {
        let mut guard = self
            .memberships
            .write()
            .map_err(|_| poisoned("membership"))?;
        let key = (membership.user_id, membership.group_id);
        if guard.contains_key(&key) {
            return Ok(false);
        }
        guard.insert(
            key,
            Membership {
                user_id: membership.user_id,
                group_id: membership.group_id,
                username: membership.username,
                inviter_id: membership.inviter_id,
                invited_count: 0,
                is_restricted: membership.restricted,
                joined_at: membership.joined_at,
                last_updated: membership.joined_at,
                welcome_message_id: None,
            },
        );
        Ok(true)
    }

    async fn increment_invited_count(
        &self,
        user_id: UserId,
        group_id: GroupId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<u32>> {
        let mut guard = self
            .memberships
            .write()
            .map_err(|_| poisoned("membership"))?;
        Ok(guard.get_mut(&(user_id, group_id)).map(|record| {
            record.invited_count = record.invited_count.saturating_add(1);
            record.last_updated = at;
            record.invited_count
        }))
    }

    async fn set_restricted(
        &self,
        user_id: UserId,
        group_id: GroupId,
        restricted: bool,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut guard = self
            .memberships
            .write()
            .map_err(|_| poisoned("membership"))?;
        match guard.get_mut(&(user_id, group_id)) {
            Some(record) if record.is_restricted != restricted => {
                record.is_restricted = restricted;
                record.last_updated = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn swap_welcome_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        expected: Option<MessageId>,
        new: Option<MessageId>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut guard = self
            .memberships
            .write()
            .map_err(|_| poisoned("membership"))?;
        match guard.get_mut(&(user_id, group_id)) {
            Some(record) if record.welcome_message_id == expected => {
                record.welcome_message_id = new;
                record.last_updated = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_restricted(&self, group_id: GroupId) -> StorageResult<Vec<Membership>> {
        let guard = self.memberships.read().map_err(|_| poisoned("membership"))?;
        Ok(guard
            .values()
            .filter(|record| record.group_id == group_id && record.is_restricted)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AdminAuditStore for InMemoryGatekeeperStorage {
    async fn append_admin_command(
        &self,
        entry: AdminCommandAppend,
    ) -> StorageResult<AdminCommandRecord> {
        let mut guard = self
            .admin_commands
            .write()
            .map_err(|_| poisoned("admin audit"))?;
        let record = AdminCommandRecord {
            id: guard.len() as i64 + 1,
            group_id: entry.group_id,
            admin_id: entry.admin_id,
            command: entry.command,
            parameters: entry.parameters,
            executed_at: entry.executed_at,
        };
        guard.push(record.clone());
        Ok(record)
    }

    async fn list_admin_commands(
        &self,
        group_id: GroupId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AdminCommandRecord>> {
        let guard = self
            .admin_commands
            .read()
            .map_err(|_| poisoned("admin audit"))?;
        let mut values = guard
            .iter()
            .filter(|record| record.group_id == group_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl ConversationStore for InMemoryGatekeeperStorage {
    async fn append_turn(&self, turn: ConversationAppend) -> StorageResult<ConversationTurn> {
        let mut guard = self.turns.write().map_err(|_| poisoned("conversation"))?;
        let id = guard.last().map(|t| t.id + 1).unwrap_or(1);
        let record = ConversationTurn {
            id,
            user_id: turn.user_id,
            group_id: turn.group_id,
            message_text: turn.message_text,
            response_text: turn.response_text,
            role: turn.role,
            created_at: turn.created_at,
        };
        guard.push(record.clone());
        Ok(record)
    }

    async fn recent_turns(
        &self,
        user_id: UserId,
        group_id: GroupId,
        limit: usize,
    ) -> StorageResult<Vec<ConversationTurn>> {
        let guard = self.turns.read().map_err(|_| poisoned("conversation"))?;
        let mut values = guard
            .iter()
            .filter(|t| t.user_id == user_id && t.group_id == group_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        values.truncate(limit);
        values.reverse();
        Ok(values)
    }

    async fn purge_turns_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut guard = self.turns.write().map_err(|_| poisoned("conversation"))?;
        let before = guard.len();
        guard.retain(|t| t.created_at >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
