//! Messaging gateway capability.
//!
//! The controller is transport-agnostic: everything it does on the chat
//! platform goes through [`MessagingGateway`].

use crate::error::DeliveryError;
use async_trait::async_trait;
use invitegate_storage::{GroupId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Chat a message lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTarget {
    Group(GroupId),
    /// Private chat with a user.
    User(UserId),
}

impl MessageTarget {
    /// Platform chat identifier. Private chats share the user's id.
    pub fn chat_id(&self) -> i64 {
        match self {
            MessageTarget::Group(group) => group.0,
            MessageTarget::User(user) => user.0,
        }
    }
}

/// Handle to a message the gateway delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub target: MessageTarget,
    pub message_id: MessageId,
}

impl MessageHandle {
    pub fn in_group(group_id: GroupId, message_id: MessageId) -> Self {
        Self {
            target: MessageTarget::Group(group_id),
            message_id,
        }
    }
}

/// Button attached to a message. `payload` is routed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveControl {
    pub label: String,
    pub payload: String,
}

/// Message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub target: MessageTarget,
    pub text: String,
    pub control: Option<InteractiveControl>,
    pub reply_to: Option<MessageId>,
}

impl OutboundMessage {
    pub fn new(target: MessageTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
            control: None,
            reply_to: None,
        }
    }

    pub fn to_group(group_id: GroupId, text: impl Into<String>) -> Self {
        Self::new(MessageTarget::Group(group_id), text)
    }

    pub fn to_user(user_id: UserId, text: impl Into<String>) -> Self {
        Self::new(MessageTarget::User(user_id), text)
    }

    pub fn with_control(mut self, control: InteractiveControl) -> Self {
        self.control = Some(control);
        self
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Member permission set applied on mute/unmute.
///
/// Inviting others is always allowed and pinning or changing chat info is
/// always denied; only the posting rights depend on the mute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPermissions {
    pub can_send_messages: bool,
    pub can_send_media_messages: bool,
    pub can_send_polls: bool,
    pub can_send_other_messages: bool,
    pub can_add_web_page_previews: bool,
    pub can_invite_users: bool,
    pub can_pin_messages: bool,
    pub can_change_info: bool,
}

impl MemberPermissions {
    fn with_posting(allowed: bool) -> Self {
        Self {
            can_send_messages: allowed,
            can_send_media_messages: allowed,
            can_send_polls: allowed,
            can_send_other_messages: allowed,
            can_add_web_page_previews: allowed,
            can_invite_users: true,
            can_pin_messages: false,
            can_change_info: false,
        }
    }

    pub fn muted() -> Self {
        Self::with_posting(false)
    }

    pub fn unmuted() -> Self {
        Self::with_posting(true)
    }
}

/// Chat platform operations the gatekeeper needs.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Live role lookup. Never cached by callers.
    async fn is_admin(&self, group_id: GroupId, user_id: UserId) -> Result<bool, DeliveryError>;

    async fn apply_permissions(
        &self,
        group_id: GroupId,
        user_id: UserId,
        permissions: MemberPermissions,
    ) -> Result<(), DeliveryError>;

    async fn mute(&self, group_id: GroupId, user_id: UserId) -> Result<(), DeliveryError> {
        self.apply_permissions(group_id, user_id, MemberPermissions::muted())
            .await
    }

    async fn unmute(&self, group_id: GroupId, user_id: UserId) -> Result<(), DeliveryError> {
        self.apply_permissions(group_id, user_id, MemberPermissions::unmuted())
            .await
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<MessageHandle, DeliveryError>;

    async fn edit_message(&self, handle: MessageHandle, text: &str) -> Result<(), DeliveryError>;

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), DeliveryError>;

    async fn member_count(&self, group_id: GroupId) -> Result<u64, DeliveryError>;

    /// Acknowledge a control press, optionally with a notice or alert.
    async fn answer_control(
        &self,
        control_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError>;
}
