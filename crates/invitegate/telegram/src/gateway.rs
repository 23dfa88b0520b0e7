//! [`MessagingGateway`] over the Bot API.

use crate::api::BotApi;
use crate::types::{ChatMember, InlineKeyboardButton, InlineKeyboardMarkup};
use async_trait::async_trait;
use invitegate_core::{
    DeliveryError, MemberPermissions, MessageHandle, MessagingGateway, OutboundMessage,
};
use invitegate_storage::{GroupId, MessageId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct TelegramGateway {
    api: BotApi,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramGateway {
    pub fn new(api: BotApi) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &BotApi {
        &self.api
    }
}

/// `sendMessage` body. Text is sent without a parse mode so user names
/// never need escaping.
pub fn send_message_body(message: &OutboundMessage) -> Value {
    let mut body = json!({
        "chat_id": message.target.chat_id(),
        "text": message.text,
    });
    if let Some(control) = &message.control {
        let markup = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: control.label.clone(),
                callback_data: control.payload.clone(),
            }]],
        };
        body["reply_markup"] = json!(markup);
    }
    if let Some(reply_to) = message.reply_to {
        body["reply_to_message_id"] = json!(reply_to.0);
        body["allow_sending_without_reply"] = json!(true);
    }
    body
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn is_admin(&self, group_id: GroupId, user_id: UserId) -> Result<bool, DeliveryError> {
        let member: ChatMember = self
            .api
            .call(
                "getChatMember",
                &json!({ "chat_id": group_id.0, "user_id": user_id.0 }),
            )
            .await?;
        Ok(member.is_admin())
    }

    async fn apply_permissions(
        &self,
        group_id: GroupId,
        user_id: UserId,
        permissions: MemberPermissions,
    ) -> Result<(), DeliveryError> {
        let _: bool = self
            .api
            .call(
                "restrictChatMember",
                &json!({
                    "chat_id": group_id.0,
                    "user_id": user_id.0,
                    "permissions": permissions,
                }),
            )
            .await?;
        tracing::debug!(
            user_id = %user_id,
            group_id = %group_id,
            can_send_messages = permissions.can_send_messages,
            "Member permissions applied"
        );
        Ok(())
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<MessageHandle, DeliveryError> {
        let sent: SentMessage = self
            .api
            .call("sendMessage", &send_message_body(&message))
            .await?;
        Ok(MessageHandle {
            target: message.target,
            message_id: MessageId(sent.message_id),
        })
    }

    async fn edit_message(&self, handle: MessageHandle, text: &str) -> Result<(), DeliveryError> {
        // The result is the edited message, or `true` for inline messages.
        let _: Value = self
            .api
            .call(
                "editMessageText",
                &json!({
                    "chat_id": handle.target.chat_id(),
                    "message_id": handle.message_id.0,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), DeliveryError> {
        let _: bool = self
            .api
            .call(
                "deleteMessage",
                &json!({
                    "chat_id": handle.target.chat_id(),
                    "message_id": handle.message_id.0,
                }),
            )
            .await?;
        Ok(())
    }

    async fn member_count(&self, group_id: GroupId) -> Result<u64, DeliveryError> {
        Ok(self
            .api
            .call("getChatMemberCount", &json!({ "chat_id": group_id.0 }))
            .await?)
    }

    async fn answer_control(
        &self,
        control_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError> {
        let mut body = json!({
            "callback_query_id": control_id,
            "show_alert": alert,
        });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.api.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invitegate_core::{ControlPayload, InteractiveControl};

    #[test]
    fn prompt_body_carries_inline_button() {
        let message = OutboundMessage::to_group(GroupId(-100), "welcome")
            .with_control(InteractiveControl {
                label: "I have added enough members".into(),
                payload: ControlPayload::new(UserId(7), GroupId(-100)).encode(),
            });
        let body = send_message_body(&message);

        assert_eq!(body["chat_id"], json!(-100));
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            json!("check_invites:7:-100")
        );
        assert!(body.get("reply_to_message_id").is_none());
        assert!(body.get("parse_mode").is_none());
    }

    #[test]
    fn reply_body_targets_original_message() {
        let message = OutboundMessage::to_group(GroupId(-100), "@ann, hi").reply_to(MessageId(55));
        let body = send_message_body(&message);
        assert_eq!(body["reply_to_message_id"], json!(55));
        assert_eq!(body["allow_sending_without_reply"], json!(true));
        assert!(body.get("reply_markup").is_none());
    }

    #[test]
    fn permissions_serialize_with_bot_api_names() {
        let value = serde_json::to_value(MemberPermissions::muted()).unwrap();
        assert_eq!(value["can_send_messages"], json!(false));
        assert_eq!(value["can_invite_users"], json!(true));
        assert_eq!(value["can_pin_messages"], json!(false));
    }
}
