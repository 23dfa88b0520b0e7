use crate::model::{
    AdminCommandAppend, AdminCommandRecord, ConversationAppend, ConversationTurn, GroupId,
    GroupSettings, Membership, MessageId, NewMembership, UserId,
};
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for per-group settings.
#[async_trait]
pub trait GroupSettingsStore: Send + Sync {
    async fn get_settings(&self, group_id: GroupId) -> StorageResult<Option<GroupSettings>>;

    /// Create or replace the quota for a group and return the stored row.
    async fn upsert_settings(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<GroupSettings>;

    /// Create settings only when the group has none. Returns `true` if a row
    /// was created.
    async fn insert_settings_if_absent(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;
}

/// Storage interface for memberships.
///
/// Every mutation is a single conditional statement keyed by
/// `(user_id, group_id)`; callers never read-then-write.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> StorageResult<Option<Membership>>;

    /// Insert unless the key exists. Returns `true` if a row was created; an
    /// existing row is left untouched.
    async fn insert_membership_if_absent(&self, membership: NewMembership) -> StorageResult<bool>;

    /// `invited_count += 1`. Returns the new count, or `None` when no such
    /// membership exists.
    async fn increment_invited_count(
        &self,
        user_id: UserId,
        group_id: GroupId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<u32>>;

    /// Set the restriction flag. Returns `true` only if the stored value
    /// changed, so a repeated transition is observable as a no-op.
    async fn set_restricted(
        &self,
        user_id: UserId,
        group_id: GroupId,
        restricted: bool,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Compare-and-set of the welcome prompt handle: writes `new` only if the
    /// stored handle equals `expected`. Returns `true` if the write happened.
    async fn swap_welcome_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        expected: Option<MessageId>,
        new: Option<MessageId>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Snapshot of restricted memberships in a group. Unordered.
    async fn list_restricted(&self, group_id: GroupId) -> StorageResult<Vec<Membership>>;
}

/// Storage interface for the append-only admin command audit.
#[async_trait]
pub trait AdminAuditStore: Send + Sync {
    async fn append_admin_command(
        &self,
        entry: AdminCommandAppend,
    ) -> StorageResult<AdminCommandRecord>;

    /// Read a group's audit newest-first.
    async fn list_admin_commands(
        &self,
        group_id: GroupId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AdminCommandRecord>>;
}

/// Storage interface for bounded conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_turn(&self, turn: ConversationAppend) -> StorageResult<ConversationTurn>;

    /// Last `limit` turns for the pair, oldest first.
    async fn recent_turns(
        &self,
        user_id: UserId,
        group_id: GroupId,
        limit: usize,
    ) -> StorageResult<Vec<ConversationTurn>>;

    /// Delete turns created before `cutoff`. Returns the number deleted.
    async fn purge_turns_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;
}

/// Unified storage bundle used by the gatekeeper core.
pub trait GatekeeperStorage:
    GroupSettingsStore + MembershipStore + AdminAuditStore + ConversationStore + Send + Sync
{
}

impl<T> GatekeeperStorage for T where
    T: GroupSettingsStore + MembershipStore + AdminAuditStore + ConversationStore + Send + Sync
{
}
