//! Conversation bridge: forwards unrestricted members' text to the
//! completion provider with bounded per-user history.

use crate::completion::{CompletionProvider, CompletionRequest, HistoryEntry};
use crate::config::{ConversationConfig, DeliveryConfig};
use crate::error::ProviderFailure;
use crate::gateway::{MessagingGateway, OutboundMessage};
use crate::messages;
use crate::retry::RetryPolicy;
use chrono::Utc;
use invitegate_storage::{
    ConversationAppend, GatekeeperStorage, GroupId, MessageId, TurnRole, UserId,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ConversationBridge {
    store: Arc<dyn GatekeeperStorage>,
    provider: Arc<dyn CompletionProvider>,
    gateway: Arc<dyn MessagingGateway>,
    history_limit: usize,
    provider_timeout: Duration,
    reply_policy: RetryPolicy,
    notice_policy: RetryPolicy,
}

impl ConversationBridge {
    pub fn new(
        store: Arc<dyn GatekeeperStorage>,
        provider: Arc<dyn CompletionProvider>,
        gateway: Arc<dyn MessagingGateway>,
        conversation: &ConversationConfig,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self {
            store,
            provider,
            gateway,
            history_limit: conversation.history_limit,
            provider_timeout: conversation.provider_timeout(),
            reply_policy: delivery.reply_policy(),
            notice_policy: delivery.notice_policy(),
        }
    }

    /// Produce a reply for `message_text`, or `None` when the assistant is
    /// unavailable.
    ///
    /// The primary call carries history; on any failure a single-turn
    /// fallback is tried exactly once. History rows are appended only after
    /// a successful primary call.
    pub async fn respond(
        &self,
        message_text: &str,
        user_id: UserId,
        group_id: GroupId,
    ) -> Option<String> {
        if !self.provider.is_configured() {
            tracing::warn!(user_id = %user_id, "Completion provider not configured");
            return None;
        }

        let history = self.load_history(user_id, group_id).await;
        let primary = CompletionRequest::with_history(message_text, history);
        match self.complete(&primary).await {
            Ok(reply) => {
                self.append_exchange(user_id, group_id, message_text, &reply)
                    .await;
                tracing::info!(user_id = %user_id, group_id = %group_id, "Assistant reply generated");
                return Some(reply);
            }
            Err(failure) => {
                tracing::warn!(
                    user_id = %user_id,
                    group_id = %group_id,
                    error = %failure,
                    "Primary completion failed, trying fallback"
                );
            }
        }

        match self.complete(&CompletionRequest::fallback(message_text)).await {
            Ok(reply) => {
                tracing::info!(user_id = %user_id, "Fallback reply generated");
                Some(reply)
            }
            Err(failure) => {
                tracing::error!(
                    user_id = %user_id,
                    group_id = %group_id,
                    error = %failure,
                    "Fallback completion failed"
                );
                None
            }
        }
    }

    /// Answer a group message: reply to it on success, otherwise post the
    /// service-unavailable notice.
    pub async fn handle_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        display_name: &str,
        message_id: MessageId,
        text: &str,
    ) {
        let Some(reply) = self.respond(text, user_id, group_id).await else {
            self.send_unavailable_notice(group_id, display_name, message_id)
                .await;
            return;
        };

        let outbound = OutboundMessage::to_group(group_id, messages::reply_to(display_name, &reply))
            .reply_to(message_id);
        let delivered = self
            .reply_policy
            .run("assistant_reply", || self.gateway.send_message(outbound.clone()))
            .await;
        match delivered {
            Ok(_) => tracing::debug!(user_id = %user_id, group_id = %group_id, "Assistant reply delivered"),
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    group_id = %group_id,
                    error = %e,
                    "Assistant reply undeliverable after retries"
                );
                self.send_unavailable_notice(group_id, display_name, message_id)
                    .await;
            }
        }
    }

    async fn send_unavailable_notice(
        &self,
        group_id: GroupId,
        display_name: &str,
        message_id: MessageId,
    ) {
        let notice = OutboundMessage::to_group(
            group_id,
            messages::reply_to(display_name, messages::SERVICE_UNAVAILABLE),
        )
        .reply_to(message_id);
        if let Err(e) = self
            .notice_policy
            .run("unavailable_notice", || self.gateway.send_message(notice.clone()))
            .await
        {
            tracing::error!(group_id = %group_id, error = %e, "Failed to deliver service notice");
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        let reply = tokio::time::timeout(self.provider_timeout, self.provider.complete(request))
            .await
            .map_err(|_| ProviderFailure::Timeout)??;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ProviderFailure::Malformed("empty reply".to_string()));
        }
        Ok(reply.to_string())
    }

    async fn load_history(&self, user_id: UserId, group_id: GroupId) -> Vec<HistoryEntry> {
        if self.history_limit == 0 {
            return Vec::new();
        }
        match self
            .store
            .recent_turns(user_id, group_id, self.history_limit)
            .await
        {
            Ok(turns) => turns
                .iter()
                .filter_map(|turn| {
                    turn.history_text().map(|text| HistoryEntry {
                        role: turn.role,
                        text: text.to_string(),
                    })
                })
                .collect(),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load history");
                Vec::new()
            }
        }
    }

    async fn append_exchange(&self, user_id: UserId, group_id: GroupId, text: &str, reply: &str) {
        let now = Utc::now();
        let turns = [
            ConversationAppend {
                user_id,
                group_id,
                message_text: text.to_string(),
                response_text: None,
                role: TurnRole::User,
                created_at: now,
            },
            ConversationAppend {
                user_id,
                group_id,
                message_text: text.to_string(),
                response_text: Some(reply.to_string()),
                role: TurnRole::Assistant,
                created_at: now,
            },
        ];
        for turn in turns {
            if let Err(e) = self.store.append_turn(turn).await {
                tracing::error!(user_id = %user_id, error = %e, "Failed to append history");
            }
        }
    }
}
