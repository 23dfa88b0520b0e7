//! Inbound event model.
//!
//! Transports translate platform updates into [`InboundEvent`]; the gate
//! controller dispatches on the variant and never inspects raw updates.

use crate::command::Command;
use crate::gateway::MessageHandle;
use invitegate_storage::{GroupId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// User that caused or is the subject of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub is_bot: bool,
}

impl Actor {
    /// `@username`, else first name, else `User <id>`.
    pub fn display_name(&self) -> String {
        display_name(self.id, self.username.as_deref(), self.first_name.as_deref())
    }
}

fn display_name(id: UserId, username: Option<&str>, first_name: Option<&str>) -> String {
    match (username, first_name) {
        (Some(username), _) if !username.is_empty() => format!("@{username}"),
        (_, Some(first)) if !first.is_empty() => first.to_string(),
        _ => format!("User {id}"),
    }
}

/// Platform-reported membership status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    /// Restricted; `is_member` tells whether the user is still in the chat.
    Restricted { is_member: bool },
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn is_present(&self) -> bool {
        match self {
            MemberStatus::Creator | MemberStatus::Administrator | MemberStatus::Member => true,
            MemberStatus::Restricted { is_member } => *is_member,
            MemberStatus::Left | MemberStatus::Kicked => false,
        }
    }
}

/// Classified membership transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Joined,
    Left,
    /// Status changed without entering or leaving (promotion, mute, ...).
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub group_id: GroupId,
    /// The user whose status changed.
    pub subject: Actor,
    /// Who performed the change, when the platform reports it.
    pub actor: Option<Actor>,
    pub old_status: MemberStatus,
    pub new_status: MemberStatus,
}

impl MembershipEvent {
    pub fn change(&self) -> MembershipChange {
        match (self.old_status.is_present(), self.new_status.is_present()) {
            (false, true) => MembershipChange::Joined,
            (true, false) => MembershipChange::Left,
            _ => MembershipChange::Unchanged,
        }
    }

    /// The user credited with the join. Self-joins and bot actors are never
    /// credited.
    pub fn inviter(&self) -> Option<&Actor> {
        self.actor
            .as_ref()
            .filter(|actor| actor.id != self.subject.id && !actor.is_bot)
    }
}

/// Chat a message or command arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatScope {
    Group(GroupId),
    Private(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub scope: ChatScope,
    pub message_id: MessageId,
    pub sender: Actor,
    /// `None` for media and service messages.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub scope: ChatScope,
    pub message_id: MessageId,
    pub sender: Actor,
    pub command: Command,
}

/// Button press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    /// Platform id used to acknowledge the press.
    pub control_id: String,
    pub presser: Actor,
    pub payload: String,
    /// Message carrying the button, if still known to the platform.
    pub origin: Option<MessageHandle>,
}

/// Everything the gate controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Membership(MembershipEvent),
    Message(MessageEvent),
    Command(CommandEvent),
    Control(ControlEvent),
}

impl InboundEvent {
    /// Split a received message into a command or a plain message.
    pub fn from_message(message: MessageEvent, bot_username: Option<&str>) -> Self {
        let command = message
            .text
            .as_deref()
            .and_then(|text| Command::parse(text, bot_username));
        match command {
            Some(command) => InboundEvent::Command(CommandEvent {
                scope: message.scope,
                message_id: message.message_id,
                sender: message.sender,
                command,
            }),
            None => InboundEvent::Message(message),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Membership(_) => "membership",
            InboundEvent::Message(_) => "message",
            InboundEvent::Command(_) => "command",
            InboundEvent::Control(_) => "control",
        }
    }
}
