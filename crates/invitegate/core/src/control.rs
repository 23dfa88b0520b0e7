//! Re-check button payload: `check_invites:<user_id>:<group_id>`.

use invitegate_storage::{GroupId, UserId};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const PREFIX: &str = "check_invites";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed control payload `{0}`")]
pub struct MalformedPayload(pub String);

/// Routes a button press back to one `(user, group)` membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlPayload {
    pub user_id: UserId,
    pub group_id: GroupId,
}

impl ControlPayload {
    pub fn new(user_id: UserId, group_id: GroupId) -> Self {
        Self { user_id, group_id }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}:{}:{}", self.user_id, self.group_id)
    }
}

impl FromStr for ControlPayload {
    type Err = MalformedPayload;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedPayload(raw.to_string());
        let mut parts = raw.split(':');
        if parts.next() != Some(PREFIX) {
            return Err(malformed());
        }
        let user = parts.next().ok_or_else(malformed)?;
        // Payloads without a group id cannot be tied to a membership.
        let group = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            user_id: UserId(user.parse().map_err(|_| malformed())?),
            group_id: GroupId(group.parse().map_err(|_| malformed())?),
        })
    }
}
