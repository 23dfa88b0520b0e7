//! Update source: long polling plus classification into inbound events.

use crate::api::BotApi;
use crate::error::TelegramResult;
use crate::types::{CallbackQuery, ChatKind, ChatMemberUpdated, Message, Update};
use invitegate_core::{
    ChatScope, ControlEvent, InboundEvent, MemberStatus, MembershipEvent, MessageEvent,
    MessageHandle, MessageTarget,
};
use invitegate_storage::{GroupId, MessageId, UserId};

/// Translate one update into the events the gate controller consumes.
///
/// Joins may arrive twice (a `chat_member` update and a `new_chat_members`
/// service message); the controller's idempotent creation absorbs that.
pub fn classify_update(update: &Update, bot_username: Option<&str>) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    if let Some(change) = &update.chat_member {
        events.extend(membership_event(change));
    }
    if let Some(change) = &update.my_chat_member {
        events.extend(membership_event(change));
    }
    if let Some(message) = &update.message {
        events.extend(message_events(message, bot_username));
    }
    if let Some(query) = &update.callback_query {
        events.push(control_event(query));
    }
    events
}

fn membership_event(change: &ChatMemberUpdated) -> Option<InboundEvent> {
    if !change.chat.is_group() {
        return None;
    }
    Some(InboundEvent::Membership(MembershipEvent {
        group_id: GroupId(change.chat.id),
        subject: change.new_chat_member.user.to_actor(),
        actor: Some(change.from.to_actor()),
        old_status: change.old_chat_member.member_status(),
        new_status: change.new_chat_member.member_status(),
    }))
}

fn message_events(message: &Message, bot_username: Option<&str>) -> Vec<InboundEvent> {
    let Some(from) = &message.from else {
        return Vec::new();
    };

    if !message.new_chat_members.is_empty() {
        if !message.chat.is_group() {
            return Vec::new();
        }
        let group_id = GroupId(message.chat.id);
        return message
            .new_chat_members
            .iter()
            .map(|member| {
                InboundEvent::Membership(MembershipEvent {
                    group_id,
                    subject: member.to_actor(),
                    actor: Some(from.to_actor()),
                    old_status: MemberStatus::Left,
                    new_status: MemberStatus::Member,
                })
            })
            .collect();
    }
    if message.left_chat_member.is_some() {
        // Leaves are reported through chat_member updates.
        return Vec::new();
    }

    let scope = match message.chat.kind {
        ChatKind::Group | ChatKind::Supergroup => ChatScope::Group(GroupId(message.chat.id)),
        ChatKind::Private => ChatScope::Private(UserId(from.id)),
        ChatKind::Channel | ChatKind::Unknown => return Vec::new(),
    };
    let event = MessageEvent {
        scope,
        message_id: MessageId(message.message_id),
        sender: from.to_actor(),
        text: message.text.clone(),
    };
    vec![InboundEvent::from_message(event, bot_username)]
}

fn control_event(query: &CallbackQuery) -> InboundEvent {
    let origin = query.message.as_ref().map(|message| {
        let target = if message.chat.is_group() {
            MessageTarget::Group(GroupId(message.chat.id))
        } else {
            MessageTarget::User(UserId(message.chat.id))
        };
        MessageHandle {
            target,
            message_id: MessageId(message.message_id),
        }
    });
    InboundEvent::Control(ControlEvent {
        control_id: query.id.clone(),
        presser: query.from.to_actor(),
        payload: query.data.clone().unwrap_or_default(),
        origin,
    })
}

/// `getUpdates` long poller that tracks the confirmation offset.
#[derive(Debug)]
pub struct UpdatePoller {
    api: BotApi,
    offset: i64,
    bot_username: Option<String>,
}

impl UpdatePoller {
    pub fn new(api: BotApi, bot_username: Option<String>) -> Self {
        Self {
            api,
            offset: 0,
            bot_username,
        }
    }

    /// Wait for the next batch of updates and classify them. Updates are
    /// confirmed by the next call, whether or not they produced events.
    pub async fn next_events(&mut self) -> TelegramResult<Vec<InboundEvent>> {
        let updates = self.api.get_updates(self.offset).await?;
        let mut events = Vec::new();
        for update in &updates {
            self.offset = self.offset.max(update.update_id + 1);
            let classified = classify_update(update, self.bot_username.as_deref());
            if classified.is_empty() {
                tracing::debug!(update_id = update.update_id, "Ignoring update");
            }
            events.extend(classified);
        }
        Ok(events)
    }
}
