//! Bot API wire types. Only the fields the gatekeeper reads are modelled.

use invitegate_core::{Actor, MemberStatus};
use invitegate_storage::UserId;
use serde::{Deserialize, Serialize};

/// `{ ok, result | description, error_code, parameters }` envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub chat_member: Option<ChatMemberUpdated>,
    pub my_chat_member: Option<ChatMemberUpdated>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    pub fn to_actor(&self) -> Actor {
        Actor {
            id: UserId(self.id),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            is_bot: self.is_bot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, ChatKind::Group | ChatKind::Supergroup)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
    pub left_chat_member: Option<User>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: ChatMemberStatus,
    pub user: User,
    /// Only reported for restricted members.
    pub is_member: Option<bool>,
}

impl ChatMember {
    pub fn member_status(&self) -> MemberStatus {
        match self.status {
            ChatMemberStatus::Creator => MemberStatus::Creator,
            ChatMemberStatus::Administrator => MemberStatus::Administrator,
            ChatMemberStatus::Member => MemberStatus::Member,
            ChatMemberStatus::Restricted => MemberStatus::Restricted {
                is_member: self.is_member.unwrap_or(true),
            },
            ChatMemberStatus::Left => MemberStatus::Left,
            ChatMemberStatus::Kicked => MemberStatus::Kicked,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self.status,
            ChatMemberStatus::Creator | ChatMemberStatus::Administrator
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    pub old_chat_member: ChatMember,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}
