//! Membership ledger: per-(user, group) state over the store.
//!
//! Reads degrade to "absent" on store failure and log; writes surface
//! [`GateError::Store`] to the caller. Every write is one keyed store
//! statement, so concurrent handlers never need a lock here.

use crate::config::GateConfig;
use crate::error::{GateResult, ValidationError};
use chrono::Utc;
use invitegate_storage::{
    AdminCommandAppend, GatekeeperStorage, GroupId, GroupSettings, Membership, MessageId,
    NewMembership, StorageError, UserId,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct MembershipLedger {
    store: Arc<dyn GatekeeperStorage>,
    gate: GateConfig,
}

impl MembershipLedger {
    pub fn new(store: Arc<dyn GatekeeperStorage>, gate: GateConfig) -> Self {
        Self { store, gate }
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    pub async fn get_settings(&self, group_id: GroupId) -> Option<GroupSettings> {
        match self.store.get_settings(group_id).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(group_id = %group_id, error = %e, "Failed to read group settings");
                None
            }
        }
    }

    /// Current settings for deciding a transition. A group without settings
    /// gets the default quota; a failed read is an error, never a guess.
    pub async fn current_settings(&self, group_id: GroupId) -> GateResult<GroupSettings> {
        if let Some(settings) = self.store.get_settings(group_id).await? {
            return Ok(settings);
        }
        if self
            .store
            .insert_settings_if_absent(group_id, self.gate.default_required_users, Utc::now())
            .await?
        {
            tracing::info!(
                group_id = %group_id,
                required_users = self.gate.default_required_users,
                "Created default group settings"
            );
        }
        self.store
            .get_settings(group_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("settings for group {group_id}")).into())
    }

    /// Current settings for prompt and notice text, creating the default
    /// quota when the group has none.
    ///
    /// Never fails: if the store is unreachable the default quota is shown.
    /// Transitions use [`Self::current_settings`] instead.
    pub async fn settings_or_default(&self, group_id: GroupId) -> GroupSettings {
        if let Some(settings) = self.get_settings(group_id).await {
            return settings;
        }
        let now = Utc::now();
        match self
            .store
            .insert_settings_if_absent(group_id, self.gate.default_required_users, now)
            .await
        {
            Ok(true) => tracing::info!(
                group_id = %group_id,
                required_users = self.gate.default_required_users,
                "Created default group settings"
            ),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(group_id = %group_id, error = %e, "Failed to create group settings")
            }
        }
        self.get_settings(group_id).await.unwrap_or(GroupSettings {
            group_id,
            required_users: self.gate.default_required_users,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the group quota. Out-of-range values are rejected without
    /// touching the store.
    pub async fn upsert_settings(
        &self,
        group_id: GroupId,
        required_users: u32,
    ) -> GateResult<GroupSettings> {
        if !self.gate.contains(i64::from(required_users)) {
            return Err(ValidationError::InvalidRange {
                value: i64::from(required_users),
                min: self.gate.min_required_users,
                max: self.gate.max_required_users,
            }
            .into());
        }
        let settings = self
            .store
            .upsert_settings(group_id, required_users, Utc::now())
            .await?;
        Ok(settings)
    }

    pub async fn get_membership(&self, user_id: UserId, group_id: GroupId) -> Option<Membership> {
        match self.store.get_membership(user_id, group_id).await {
            Ok(membership) => membership,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    group_id = %group_id,
                    error = %e,
                    "Failed to read membership"
                );
                None
            }
        }
    }

    /// Create a membership unless one exists. Returns `true` only for the
    /// call that created the row.
    pub async fn create_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
        username: Option<String>,
        inviter_id: Option<UserId>,
        restricted: bool,
    ) -> GateResult<bool> {
        let created = self
            .store
            .insert_membership_if_absent(NewMembership {
                user_id,
                group_id,
                username,
                inviter_id,
                restricted,
                joined_at: Utc::now(),
            })
            .await?;
        if created {
            tracing::info!(
                user_id = %user_id,
                group_id = %group_id,
                inviter_id = ?inviter_id.map(|id| id.0),
                restricted,
                "Membership created"
            );
        } else {
            tracing::debug!(user_id = %user_id, group_id = %group_id, "Membership already exists");
        }
        Ok(created)
    }

    /// Credit one referral. A referral from an inviter without a membership
    /// in this group is dropped; the new count is returned otherwise.
    pub async fn increment_invites(&self, inviter_id: UserId, group_id: GroupId) -> Option<u32> {
        match self
            .store
            .increment_invited_count(inviter_id, group_id, Utc::now())
            .await
        {
            Ok(Some(count)) => {
                tracing::info!(
                    user_id = %inviter_id,
                    group_id = %group_id,
                    invited_count = count,
                    "Invite credited"
                );
                Some(count)
            }
            Ok(None) => {
                tracing::warn!(
                    user_id = %inviter_id,
                    group_id = %group_id,
                    "Referral from unknown inviter dropped"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    user_id = %inviter_id,
                    group_id = %group_id,
                    error = %e,
                    "Failed to credit invite"
                );
                None
            }
        }
    }

    /// Returns `true` only if the flag actually changed.
    pub async fn set_restricted(
        &self,
        user_id: UserId,
        group_id: GroupId,
        restricted: bool,
    ) -> GateResult<bool> {
        Ok(self
            .store
            .set_restricted(user_id, group_id, restricted, Utc::now())
            .await?)
    }

    /// Record a freshly sent welcome prompt. Fails (returns `false`) when
    /// another prompt is already recorded.
    pub async fn claim_welcome_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        message_id: MessageId,
    ) -> GateResult<bool> {
        Ok(self
            .store
            .swap_welcome_message(user_id, group_id, None, Some(message_id), Utc::now())
            .await?)
    }

    /// Forget the prompt `message_id`, if it is still the recorded one.
    pub async fn release_welcome_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        message_id: MessageId,
    ) -> GateResult<bool> {
        Ok(self
            .store
            .swap_welcome_message(user_id, group_id, Some(message_id), None, Utc::now())
            .await?)
    }

    pub async fn list_restricted(&self, group_id: GroupId) -> GateResult<Vec<Membership>> {
        Ok(self.store.list_restricted(group_id).await?)
    }

    pub async fn record_admin_command(
        &self,
        group_id: GroupId,
        admin_id: UserId,
        command: &str,
        parameters: Option<String>,
    ) -> GateResult<()> {
        self.store
            .append_admin_command(AdminCommandAppend {
                group_id,
                admin_id,
                command: command.to_string(),
                parameters,
                executed_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
