use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::StorageError;

/// Platform user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Platform group (chat) identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Chat-scoped platform message identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-group gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub group_id: GroupId,
    pub required_users: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Restriction and invite state of one user inside one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub username: Option<String>,
    /// Set once at creation, never changed.
    pub inviter_id: Option<UserId>,
    pub invited_count: u32,
    pub is_restricted: bool,
    pub joined_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Handle of the outstanding welcome prompt, if one is believed to exist.
    pub welcome_message_id: Option<MessageId>,
}

impl Membership {
    /// Invites still missing to reach `required_users`.
    pub fn remaining(&self, required_users: u32) -> u32 {
        required_users.saturating_sub(self.invited_count)
    }

    /// Whether the quota is met for the given requirement.
    pub fn meets_quota(&self, required_users: u32) -> bool {
        self.invited_count >= required_users
    }
}

/// Creation payload for a membership. Counters start at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMembership {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub username: Option<String>,
    pub inviter_id: Option<UserId>,
    pub restricted: bool,
    pub joined_at: DateTime<Utc>,
}

/// Admin command audit append payload. Ids are assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCommandAppend {
    pub group_id: GroupId,
    pub admin_id: UserId,
    pub command: String,
    pub parameters: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Persisted admin command audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCommandRecord {
    pub id: i64,
    pub group_id: GroupId,
    pub admin_id: UserId,
    pub command: String,
    pub parameters: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = StorageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            _ => Err(StorageError::Serialization(format!(
                "unknown turn role `{raw}`"
            ))),
        }
    }
}

/// Conversation append payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAppend {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub message_text: String,
    pub response_text: Option<String>,
    pub role: TurnRole,
    pub created_at: DateTime<Utc>,
}

/// Persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub message_text: String,
    pub response_text: Option<String>,
    pub role: TurnRole,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Text this turn contributes to a rebuilt history, if any.
    ///
    /// User turns contribute the user's text; assistant turns contribute the
    /// stored reply.
    pub fn history_text(&self) -> Option<&str> {
        let text = match self.role {
            TurnRole::User => Some(self.message_text.as_str()),
            TurnRole::Assistant => self.response_text.as_deref(),
        };
        text.filter(|t| !t.trim().is_empty())
    }
}
