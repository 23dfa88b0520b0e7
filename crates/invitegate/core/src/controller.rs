//! Gate controller: the membership state machine.
//!
//! Every inbound event goes through [`GateController::dispatch`], which picks
//! the handler, and applies the error policy in one place. Handlers never
//! hold a lock across an await; each step is an independent atomic ledger
//! write followed by an idempotent re-check.

use crate::bridge::ConversationBridge;
use crate::command::Command;
use crate::control::ControlPayload;
use crate::error::{ErrorKind, GateError, GateResult, ValidationError};
use crate::events::{
    Actor, ChatScope, CommandEvent, ControlEvent, InboundEvent, MembershipChange,
    MembershipEvent, MessageEvent,
};
use crate::gateway::{InteractiveControl, MessageHandle, MessagingGateway, OutboundMessage};
use crate::ledger::MembershipLedger;
use crate::messages;
use invitegate_storage::{GroupId, MessageId, UserId};
use std::sync::Arc;

/// How an outstanding welcome prompt is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptExit<'a> {
    Delete,
    /// Edit the prompt into `text`; it no longer counts as outstanding.
    Edit(&'a str),
}

/// Outcome of a re-check button press.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RecheckOutcome {
    Granted,
    AlreadyUnrestricted,
    Missing(u32),
}

#[derive(Clone)]
pub struct GateController {
    ledger: MembershipLedger,
    gateway: Arc<dyn MessagingGateway>,
    bridge: ConversationBridge,
    bot_id: UserId,
}

impl GateController {
    pub fn new(
        ledger: MembershipLedger,
        gateway: Arc<dyn MessagingGateway>,
        bridge: ConversationBridge,
        bot_id: UserId,
    ) -> Self {
        Self {
            ledger,
            gateway,
            bridge,
            bot_id,
        }
    }

    pub fn ledger(&self) -> &MembershipLedger {
        &self.ledger
    }

    /// Handle one inbound event. Failures are logged and never propagate:
    /// one event's failure must not affect the next.
    pub async fn dispatch(&self, event: InboundEvent) {
        let kind = event.kind();
        let outcome = match &event {
            InboundEvent::Membership(e) => self.on_membership(e).await,
            InboundEvent::Message(e) => self.on_message(e).await,
            InboundEvent::Command(e) => self.on_command(e).await,
            InboundEvent::Control(e) => self.on_control(e).await,
        };
        if let Err(err) = outcome {
            match err.kind() {
                ErrorKind::TransientDelivery | ErrorKind::Provider | ErrorKind::NotConfigured => {
                    tracing::warn!(event = kind, error = %err, "Event handled with degraded outcome")
                }
                ErrorKind::Validation | ErrorKind::PermissionDenied => {
                    tracing::info!(event = kind, error = %err, "Event rejected")
                }
                ErrorKind::Store => {
                    tracing::error!(event = kind, error = %err, "Event handler failed")
                }
            }
        }
    }

    async fn on_membership(&self, event: &MembershipEvent) -> GateResult<()> {
        let group_id = event.group_id;
        match event.change() {
            MembershipChange::Joined if event.subject.id == self.bot_id => {
                self.on_bot_added(group_id).await;
                Ok(())
            }
            MembershipChange::Joined if event.subject.is_bot => {
                tracing::debug!(user_id = %event.subject.id, group_id = %group_id, "Ignoring bot join");
                Ok(())
            }
            MembershipChange::Joined => {
                self.on_member_joined(group_id, &event.subject, event.inviter())
                    .await
            }
            MembershipChange::Left => {
                // State is kept so a rejoin resumes where it stopped.
                tracing::info!(
                    user_id = %event.subject.id,
                    group_id = %group_id,
                    member = %event.subject.display_name(),
                    "Member left"
                );
                Ok(())
            }
            MembershipChange::Unchanged => Ok(()),
        }
    }

    async fn on_bot_added(&self, group_id: GroupId) {
        let settings = self.ledger.settings_or_default(group_id).await;
        match self.gateway.member_count(group_id).await {
            Ok(count) => tracing::info!(
                group_id = %group_id,
                member_count = count,
                required_users = settings.required_users,
                "Bot added to group"
            ),
            Err(e) => tracing::warn!(
                group_id = %group_id,
                error = %e,
                "Bot added to group; member count unavailable"
            ),
        }
    }

    async fn on_member_joined(
        &self,
        group_id: GroupId,
        subject: &Actor,
        inviter: Option<&Actor>,
    ) -> GateResult<()> {
        let settings = self.ledger.settings_or_default(group_id).await;
        let created = self
            .ledger
            .create_membership(
                subject.id,
                group_id,
                subject.username.clone(),
                inviter.map(|actor| actor.id),
                true,
            )
            .await?;
        if !created {
            // Replayed join or rejoin: the first delivery already acted.
            return Ok(());
        }

        match inviter {
            None => {
                self.mute(group_id, subject.id).await;
                self.send_welcome_prompt(
                    group_id,
                    subject.id,
                    &subject.display_name(),
                    settings.required_users,
                    0,
                )
                .await;
            }
            Some(inviter) => {
                // No platform mute for invited users: it would post a
                // system notice. Their first message is gated instead.
                tracing::info!(
                    user_id = %subject.id,
                    inviter_id = %inviter.id,
                    group_id = %group_id,
                    "Member added by inviter"
                );
                self.credit_inviter(group_id, inviter.id).await?;
            }
        }
        Ok(())
    }

    async fn credit_inviter(&self, group_id: GroupId, inviter_id: UserId) -> GateResult<()> {
        if self
            .ledger
            .increment_invites(inviter_id, group_id)
            .await
            .is_none()
        {
            return Ok(());
        }
        // The prompt shows a stale count now; the next message re-prompts.
        self.retire_welcome_prompt(inviter_id, group_id, PromptExit::Delete)
            .await;
        self.reevaluate(inviter_id, group_id, PromptExit::Delete)
            .await?;
        Ok(())
    }

    /// Unrestrict `user_id` if the quota is met. Returns `true` for the one
    /// evaluation that performed the transition.
    async fn reevaluate(
        &self,
        user_id: UserId,
        group_id: GroupId,
        exit: PromptExit<'_>,
    ) -> GateResult<bool> {
        let Some(membership) = self.ledger.get_membership(user_id, group_id).await else {
            return Ok(false);
        };
        if !membership.is_restricted {
            return Ok(false);
        }
        let settings = self.ledger.current_settings(group_id).await?;
        if !membership.meets_quota(settings.required_users) {
            return Ok(false);
        }

        if let Err(e) = self.gateway.unmute(group_id, user_id).await {
            tracing::warn!(
                user_id = %user_id,
                group_id = %group_id,
                error = %e,
                "Platform unmute failed; ledger still records the user as unrestricted"
            );
        }
        if !self.ledger.set_restricted(user_id, group_id, false).await? {
            tracing::debug!(user_id = %user_id, group_id = %group_id, "Already unrestricted");
            return Ok(false);
        }

        self.retire_welcome_prompt(user_id, group_id, exit).await;
        if let Err(e) = self
            .gateway
            .send_message(OutboundMessage::to_user(user_id, messages::ACCESS_GRANTED))
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Could not notify user of access");
        }
        tracing::info!(
            user_id = %user_id,
            group_id = %group_id,
            invited_count = membership.invited_count,
            required_users = settings.required_users,
            "User unrestricted"
        );
        Ok(true)
    }

    async fn on_message(&self, event: &MessageEvent) -> GateResult<()> {
        let group_id = match event.scope {
            ChatScope::Group(group_id) => group_id,
            ChatScope::Private(user_id) => {
                self.reply(
                    OutboundMessage::to_user(user_id, messages::HELP).reply_to(event.message_id),
                )
                .await;
                return Ok(());
            }
        };
        let sender = &event.sender;
        if sender.is_bot {
            return Ok(());
        }
        if self.is_admin(group_id, sender.id).await {
            tracing::debug!(user_id = %sender.id, group_id = %group_id, "Skipping admin message");
            return Ok(());
        }

        let membership = match self.ledger.get_membership(sender.id, group_id).await {
            Some(membership) => membership,
            None => {
                self.adopt_unknown_member(group_id, sender).await?;
                match self.ledger.get_membership(sender.id, group_id).await {
                    Some(membership) => membership,
                    None => {
                        tracing::warn!(
                            user_id = %sender.id,
                            group_id = %group_id,
                            "Membership missing after creation"
                        );
                        return Ok(());
                    }
                }
            }
        };

        if membership.is_restricted {
            self.on_restricted_message(group_id, event, membership.inviter_id, membership.invited_count)
                .await;
            return Ok(());
        }

        match event.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                self.bridge
                    .handle_message(
                        group_id,
                        sender.id,
                        &sender.display_name(),
                        event.message_id,
                        text,
                    )
                    .await;
            }
            _ => {}
        }
        Ok(())
    }

    /// A sender with no record predates the bot or slipped past the join
    /// handler: start them restricted.
    async fn adopt_unknown_member(&self, group_id: GroupId, sender: &Actor) -> GateResult<()> {
        let settings = self.ledger.settings_or_default(group_id).await;
        let created = self
            .ledger
            .create_membership(sender.id, group_id, sender.username.clone(), None, true)
            .await?;
        if created {
            self.mute(group_id, sender.id).await;
            self.send_welcome_prompt(
                group_id,
                sender.id,
                &sender.display_name(),
                settings.required_users,
                0,
            )
            .await;
        }
        Ok(())
    }

    async fn on_restricted_message(
        &self,
        group_id: GroupId,
        event: &MessageEvent,
        inviter_id: Option<UserId>,
        invited_count: u32,
    ) {
        let sender = &event.sender;
        if let Err(e) = self
            .gateway
            .delete_message(MessageHandle::in_group(group_id, event.message_id))
            .await
        {
            tracing::warn!(
                user_id = %sender.id,
                group_id = %group_id,
                error = %e,
                "Could not delete message from restricted user"
            );
        }

        let settings = self.ledger.settings_or_default(group_id).await;
        let display = sender.display_name();
        if inviter_id.is_none() {
            let notice = messages::restriction_notice(&display, invited_count, settings.required_users);
            self.reply(OutboundMessage::to_group(group_id, notice)).await;
        }
        self.send_welcome_prompt(
            group_id,
            sender.id,
            &display,
            settings.required_users,
            invited_count,
        )
        .await;
    }

    async fn on_command(&self, event: &CommandEvent) -> GateResult<()> {
        if event.sender.is_bot {
            return Ok(());
        }
        let reply_target = match event.scope {
            ChatScope::Group(group_id) => OutboundMessage::to_group(group_id, String::new()),
            ChatScope::Private(user_id) => OutboundMessage::to_user(user_id, String::new()),
        };
        let text = match self.run_command(event).await {
            Ok(text) => text,
            Err(err) => {
                tracing::info!(
                    command = event.command.name(),
                    user_id = %event.sender.id,
                    error = %err,
                    "Command failed"
                );
                let gate = self.ledger.gate();
                messages::command_error(&err, gate.min_required_users, gate.max_required_users)
            }
        };
        self.reply(
            OutboundMessage {
                text,
                ..reply_target
            }
            .reply_to(event.message_id),
        )
        .await;
        Ok(())
    }

    async fn run_command(&self, event: &CommandEvent) -> GateResult<String> {
        // Private chats only ever get the help text.
        let group_id = match event.scope {
            ChatScope::Group(group_id) if event.command.requires_admin() => group_id,
            _ => return Ok(messages::HELP.to_string()),
        };
        let admin_id = event.sender.id;
        if !self.is_admin(group_id, admin_id).await {
            return Err(GateError::PermissionDenied);
        }

        match &event.command {
            Command::SetRequiredUsers { argument } => {
                let required = self.parse_required(argument.as_deref())?;
                let settings = self.ledger.upsert_settings(group_id, required).await?;
                self.audit(
                    group_id,
                    admin_id,
                    event.command.name(),
                    Some(required.to_string()),
                )
                .await;
                tracing::info!(
                    group_id = %group_id,
                    admin_id = %admin_id,
                    required_users = settings.required_users,
                    "Required users updated"
                );
                Ok(messages::required_updated(settings.required_users))
            }
            Command::GrandfatherExisting => {
                let restricted = self.ledger.list_restricted(group_id).await?;
                if restricted.is_empty() {
                    return Ok(messages::GRANDFATHER_NONE.to_string());
                }
                let count = self
                    .grandfather(group_id, restricted.iter().map(|m| m.user_id))
                    .await;
                self.audit(
                    group_id,
                    admin_id,
                    event.command.name(),
                    Some(format!("unrestricted_{count}_users")),
                )
                .await;
                tracing::info!(
                    group_id = %group_id,
                    admin_id = %admin_id,
                    unrestricted = count,
                    candidates = restricted.len(),
                    "Grandfathering executed"
                );
                Ok(messages::grandfathered(count))
            }
            Command::Status => {
                let Some(settings) = self.ledger.get_settings(group_id).await else {
                    return Ok(messages::STATUS_NOT_CONFIGURED.to_string());
                };
                let restricted = self.ledger.list_restricted(group_id).await?;
                Ok(messages::status(
                    settings.required_users,
                    restricted.len(),
                    settings.updated_at,
                ))
            }
            Command::Help => Ok(messages::HELP.to_string()),
        }
    }

    fn parse_required(&self, argument: Option<&str>) -> GateResult<u32> {
        let raw = argument.ok_or(ValidationError::MissingArgument("required_users"))?;
        let value: i64 = raw
            .parse()
            .map_err(|_| ValidationError::NotANumber(raw.to_string()))?;
        let gate = self.ledger.gate();
        if !gate.contains(value) {
            return Err(ValidationError::InvalidRange {
                value,
                min: gate.min_required_users,
                max: gate.max_required_users,
            }
            .into());
        }
        u32::try_from(value).map_err(|_| {
            GateError::from(ValidationError::InvalidRange {
                value,
                min: gate.min_required_users,
                max: gate.max_required_users,
            })
        })
    }

    /// Unrestrict every listed member, best-effort per member. Members whose
    /// platform unmute fails stay restricted. Returns how many were flipped.
    async fn grandfather(&self, group_id: GroupId, users: impl Iterator<Item = UserId>) -> usize {
        let mut unrestricted = 0;
        for user_id in users {
            if let Err(e) = self.gateway.unmute(group_id, user_id).await {
                tracing::warn!(
                    user_id = %user_id,
                    group_id = %group_id,
                    error = %e,
                    "Unmute failed; member skipped"
                );
                continue;
            }
            match self.ledger.set_restricted(user_id, group_id, false).await {
                Ok(true) => {
                    self.retire_welcome_prompt(user_id, group_id, PromptExit::Delete)
                        .await;
                    unrestricted += 1;
                }
                Ok(false) => {
                    tracing::debug!(user_id = %user_id, group_id = %group_id, "Already unrestricted")
                }
                Err(e) => tracing::error!(
                    user_id = %user_id,
                    group_id = %group_id,
                    error = %e,
                    "Failed to record unrestriction"
                ),
            }
        }
        unrestricted
    }

    async fn on_control(&self, event: &ControlEvent) -> GateResult<()> {
        let payload = match event.payload.parse::<ControlPayload>() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(user_id = %event.presser.id, error = %e, "Rejected control press");
                self.answer(event, Some(messages::INVALID_DATA), true).await;
                return Ok(());
            }
        };
        if payload.user_id != event.presser.id {
            self.answer(event, Some(messages::NOT_FOR_YOU), true).await;
            return Ok(());
        }

        let outcome = self.recheck(payload.user_id, payload.group_id).await;
        match outcome {
            Ok(Some(RecheckOutcome::Granted)) => {
                let display = event.presser.display_name();
                self.reply(OutboundMessage::to_group(
                    payload.group_id,
                    messages::group_success(&display),
                ))
                .await;
                self.answer(event, Some(messages::ACCESS_GRANTED), false)
                    .await;
            }
            Ok(Some(RecheckOutcome::AlreadyUnrestricted)) => {
                if let Some(origin) = event.origin {
                    // Stale button left over from an earlier transition.
                    if let Err(e) = self
                        .gateway
                        .edit_message(origin, &messages::access_granted_prompt())
                        .await
                    {
                        tracing::debug!(error = %e, "Could not edit stale prompt");
                    }
                }
                self.answer(event, Some(messages::ACCESS_GRANTED), false)
                    .await;
            }
            Ok(Some(RecheckOutcome::Missing(remaining))) => {
                self.answer(event, Some(&messages::still_not_enough(remaining)), true)
                    .await;
            }
            Ok(None) => {
                self.answer(event, Some(messages::INVALID_DATA), true).await;
            }
            Err(err) => {
                self.answer(event, Some(messages::GENERAL_ERROR), true)
                    .await;
                return Err(err);
            }
        }
        tracing::info!(
            user_id = %payload.user_id,
            group_id = %payload.group_id,
            "Re-check control handled"
        );
        Ok(())
    }

    async fn recheck(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> GateResult<Option<RecheckOutcome>> {
        let Some(membership) = self.ledger.get_membership(user_id, group_id).await else {
            return Ok(None);
        };
        if !membership.is_restricted {
            return Ok(Some(RecheckOutcome::AlreadyUnrestricted));
        }
        let settings = self.ledger.current_settings(group_id).await?;
        if !membership.meets_quota(settings.required_users) {
            return Ok(Some(RecheckOutcome::Missing(
                membership.remaining(settings.required_users),
            )));
        }
        let granted_text = messages::access_granted_prompt();
        if self
            .reevaluate(user_id, group_id, PromptExit::Edit(&granted_text))
            .await?
        {
            Ok(Some(RecheckOutcome::Granted))
        } else {
            Ok(Some(RecheckOutcome::AlreadyUnrestricted))
        }
    }

    /// Send a welcome prompt unless one is outstanding. At most one prompt
    /// id is ever recorded: a prompt that loses the record race is deleted.
    async fn send_welcome_prompt(
        &self,
        group_id: GroupId,
        user_id: UserId,
        display: &str,
        required: u32,
        current: u32,
    ) {
        if let Some(membership) = self.ledger.get_membership(user_id, group_id).await {
            if let Some(existing) = membership.welcome_message_id {
                tracing::debug!(
                    user_id = %user_id,
                    group_id = %group_id,
                    message_id = %existing,
                    "Welcome prompt already outstanding"
                );
                return;
            }
        }

        let control = InteractiveControl {
            label: messages::RECHECK_BUTTON.to_string(),
            payload: ControlPayload::new(user_id, group_id).encode(),
        };
        let message = OutboundMessage::to_group(
            group_id,
            messages::welcome_prompt(display, required, current),
        )
        .with_control(control);
        let handle = match self.gateway.send_message(message).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(user_id = %user_id, group_id = %group_id, error = %e, "Failed to send welcome prompt");
                return;
            }
        };

        match self
            .ledger
            .claim_welcome_message(user_id, group_id, handle.message_id)
            .await
        {
            Ok(true) => tracing::info!(
                user_id = %user_id,
                group_id = %group_id,
                message_id = %handle.message_id,
                "Welcome prompt sent"
            ),
            Ok(false) => {
                tracing::info!(
                    user_id = %user_id,
                    group_id = %group_id,
                    "Concurrent welcome prompt won; deleting duplicate"
                );
                self.delete_quietly(handle).await;
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, group_id = %group_id, error = %e, "Failed to record welcome prompt");
                self.delete_quietly(handle).await;
            }
        }
    }

    /// Delete or edit away the outstanding prompt and clear its id. A prompt
    /// the platform refuses to touch (already gone) is cleared as well; a
    /// transient failure keeps the id so a later retirement can retry.
    async fn retire_welcome_prompt(&self, user_id: UserId, group_id: GroupId, exit: PromptExit<'_>) {
        let Some(message_id) = self
            .ledger
            .get_membership(user_id, group_id)
            .await
            .and_then(|m| m.welcome_message_id)
        else {
            return;
        };
        let handle = MessageHandle::in_group(group_id, message_id);
        let result = match exit {
            PromptExit::Delete => self.gateway.delete_message(handle).await,
            PromptExit::Edit(text) => self.gateway.edit_message(handle, text).await,
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    user_id = %user_id,
                    group_id = %group_id,
                    message_id = %message_id,
                    error = %e,
                    "Could not retire welcome prompt"
                );
                return;
            }
            Err(e) => tracing::info!(
                user_id = %user_id,
                message_id = %message_id,
                error = %e,
                "Welcome prompt no longer editable; clearing"
            ),
        }
        self.clear_prompt_id(user_id, group_id, message_id).await;
    }

    async fn clear_prompt_id(&self, user_id: UserId, group_id: GroupId, message_id: MessageId) {
        if let Err(e) = self
            .ledger
            .release_welcome_message(user_id, group_id, message_id)
            .await
        {
            tracing::error!(user_id = %user_id, group_id = %group_id, error = %e, "Failed to clear welcome prompt id");
        }
    }

    async fn is_admin(&self, group_id: GroupId, user_id: UserId) -> bool {
        match self.gateway.is_admin(group_id, user_id).await {
            Ok(admin) => admin,
            Err(e) => {
                tracing::warn!(user_id = %user_id, group_id = %group_id, error = %e, "Admin lookup failed");
                false
            }
        }
    }

    async fn mute(&self, group_id: GroupId, user_id: UserId) {
        if let Err(e) = self.gateway.mute(group_id, user_id).await {
            tracing::warn!(user_id = %user_id, group_id = %group_id, error = %e, "Platform mute failed");
        }
    }

    async fn audit(&self, group_id: GroupId, admin_id: UserId, command: &str, parameters: Option<String>) {
        if let Err(e) = self
            .ledger
            .record_admin_command(group_id, admin_id, command, parameters)
            .await
        {
            tracing::error!(group_id = %group_id, command, error = %e, "Failed to record admin command");
        }
    }

    async fn reply(&self, message: OutboundMessage) {
        let target = message.target;
        if let Err(e) = self.gateway.send_message(message).await {
            tracing::warn!(chat_id = target.chat_id(), error = %e, "Failed to send message");
        }
    }

    async fn delete_quietly(&self, handle: MessageHandle) {
        if let Err(e) = self.gateway.delete_message(handle).await {
            tracing::warn!(message_id = %handle.message_id, error = %e, "Failed to delete message");
        }
    }

    async fn answer(&self, event: &ControlEvent, text: Option<&str>, alert: bool) {
        if let Err(e) = self
            .gateway
            .answer_control(&event.control_id, text, alert)
            .await
        {
            tracing::warn!(user_id = %event.presser.id, error = %e, "Failed to acknowledge control");
        }
    }
}
