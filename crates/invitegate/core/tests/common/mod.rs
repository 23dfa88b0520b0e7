#![allow(dead_code)]

use async_trait::async_trait;
use invitegate_core::{
    Actor, ChatScope, CompletionProvider, CompletionRequest, ControlEvent, ConversationBridge,
    ConversationConfig, DeliveryConfig, DeliveryError, GateConfig, GateController, InboundEvent,
    MemberPermissions, MemberStatus, MembershipEvent, MembershipLedger, MessageEvent, MessageHandle,
    MessageTarget, MessagingGateway, OutboundMessage, ProviderFailure,
};
use chrono::{DateTime, Utc};
use invitegate_storage::memory::InMemoryGatekeeperStorage;
use invitegate_storage::{
    AdminAuditStore, AdminCommandAppend, AdminCommandRecord, ConversationAppend,
    ConversationStore, ConversationTurn, GroupId, GroupSettings, GroupSettingsStore, Membership,
    MembershipStore, MessageId, NewMembership, QueryWindow, StorageError, StorageResult, UserId,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GROUP: GroupId = GroupId(-100_200_300);
pub const BOT: UserId = UserId(999);
pub const ADMIN: UserId = UserId(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Permissions {
        group_id: GroupId,
        user_id: UserId,
        permissions: MemberPermissions,
    },
    Send {
        handle: MessageHandle,
        message: OutboundMessage,
    },
    Edit {
        handle: MessageHandle,
        text: String,
    },
    Delete(MessageHandle),
    Answer {
        control_id: String,
        text: Option<String>,
        alert: bool,
    },
}

/// Gateway double that records every call and fails on demand.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    next_message_id: AtomicI64,
    admins: Mutex<HashSet<UserId>>,
    failing_unmutes: Mutex<HashSet<UserId>>,
    send_failures: Mutex<VecDeque<DeliveryError>>,
    rejected_deletes: AtomicU32,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        let gateway = Self {
            next_message_id: AtomicI64::new(1000),
            ..Self::default()
        };
        gateway.admins.lock().unwrap().insert(ADMIN);
        Arc::new(gateway)
    }

    pub fn fail_unmute_for(&self, user_id: UserId) {
        self.failing_unmutes.lock().unwrap().insert(user_id);
    }

    /// The next `errors.len()` sends fail with these errors, in order.
    pub fn fail_next_sends(&self, errors: impl IntoIterator<Item = DeliveryError>) {
        self.send_failures.lock().unwrap().extend(errors);
    }

    pub fn reject_next_deletes(&self, count: u32) {
        self.rejected_deletes.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(MessageHandle, OutboundMessage)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Send { handle, message } => Some((handle, message)),
                _ => None,
            })
            .collect()
    }

    pub fn sent_to_group(&self) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|(_, m)| matches!(m.target, MessageTarget::Group(_)))
            .map(|(_, m)| m)
            .collect()
    }

    pub fn sent_to_user(&self, user_id: UserId) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|(_, m)| m.target == MessageTarget::User(user_id))
            .map(|(_, m)| m)
            .collect()
    }

    /// Prompts (messages with a control) for `user_id` that were sent and
    /// not deleted or edited since.
    pub fn live_prompts_for(&self, user_id: UserId) -> Vec<MessageHandle> {
        let calls = self.calls();
        let retired: HashSet<MessageHandle> = calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Delete(handle) => Some(*handle),
                GatewayCall::Edit { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect();
        calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Send { handle, message } => message
                    .control
                    .as_ref()
                    .filter(|c| c.payload.starts_with(&format!("check_invites:{}:", user_id)))
                    .map(|_| *handle),
                _ => None,
            })
            .filter(|handle| !retired.contains(handle))
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Delete(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    pub fn permissions_for(&self, user_id: UserId) -> Vec<MemberPermissions> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Permissions {
                    user_id: u,
                    permissions,
                    ..
                } if u == user_id => Some(permissions),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Answer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Edit { handle, text } => Some((handle, text)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn is_admin(&self, _group_id: GroupId, user_id: UserId) -> Result<bool, DeliveryError> {
        Ok(self.admins.lock().unwrap().contains(&user_id))
    }

    async fn apply_permissions(
        &self,
        group_id: GroupId,
        user_id: UserId,
        permissions: MemberPermissions,
    ) -> Result<(), DeliveryError> {
        if permissions.can_send_messages && self.failing_unmutes.lock().unwrap().contains(&user_id)
        {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        self.record(GatewayCall::Permissions {
            group_id,
            user_id,
            permissions,
        });
        Ok(())
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<MessageHandle, DeliveryError> {
        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let handle = MessageHandle {
            target: message.target,
            message_id: MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
        };
        self.record(GatewayCall::Send { handle, message });
        Ok(handle)
    }

    async fn edit_message(&self, handle: MessageHandle, text: &str) -> Result<(), DeliveryError> {
        self.record(GatewayCall::Edit {
            handle,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), DeliveryError> {
        let rejected = self
            .rejected_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(DeliveryError::Rejected("message can't be deleted".into()));
        }
        self.record(GatewayCall::Delete(handle));
        Ok(())
    }

    async fn member_count(&self, _group_id: GroupId) -> Result<u64, DeliveryError> {
        Ok(42)
    }

    async fn answer_control(
        &self,
        control_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError> {
        self.record(GatewayCall::Answer {
            control_id: control_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }
}

/// Provider double answering from a script and recording requests.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderFailure>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Mutex<Option<Duration>>,
    unconfigured: bool,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = Result<String, ProviderFailure>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn unconfigured() -> Arc<Self> {
        Arc::new(Self {
            unconfigured: true,
            ..Self::default()
        })
    }

    pub fn hang_for(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ProviderFailure::ProviderError("script exhausted".into())))
    }
}

/// Store operations that [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetSettings,
    UpsertSettings,
    InsertSettings,
    GetMembership,
    InsertMembership,
    IncrementInvites,
    SetRestricted,
    SwapWelcome,
    ListRestricted,
    AppendAdminCommand,
    AppendTurn,
    RecentTurns,
}

/// In-memory store whose operations fail on demand. `inner` bypasses the
/// faults for assertions.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryGatekeeperStorage,
    failing: Mutex<HashSet<StoreOp>>,
}

impl FaultyStore {
    pub fn fail(&self, op: StoreOp) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        self.failing.lock().unwrap().remove(&op);
    }

    fn check(&self, op: StoreOp) -> StorageResult<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(StorageError::Backend(format!("{op:?} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupSettingsStore for FaultyStore {
    async fn get_settings(&self, group_id: GroupId) -> StorageResult<Option<GroupSettings>> {
        self.check(StoreOp::GetSettings)?;
        self.inner.get_settings(group_id).await
    }

    async fn upsert_settings(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<GroupSettings> {
        self.check(StoreOp::UpsertSettings)?;
        self.inner.upsert_settings(group_id, required_users, at).await
    }

    async fn insert_settings_if_absent(
        &self,
        group_id: GroupId,
        required_users: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.check(StoreOp::InsertSettings)?;
        self.inner
            .insert_settings_if_absent(group_id, required_users, at)
            .await
    }
}

#[async_trait]
impl MembershipStore for FaultyStore {
    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> StorageResult<Option<Membership>> {
        self.check(StoreOp::GetMembership)?;
        self.inner.get_membership(user_id, group_id).await
    }

    async fn insert_membership_if_absent(&self, membership: NewMembership) -> StorageResult<bool> {
        self.check(StoreOp::InsertMembership)?;
        self.inner.insert_membership_if_absent(membership).await
    }

    async fn increment_invited_count(
        &self,
        user_id: UserId,
        group_id: GroupId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<u32>> {
        self.check(StoreOp::IncrementInvites)?;
        self.inner.increment_invited_count(user_id, group_id, at).await
    }

    async fn set_restricted(
        &self,
        user_id: UserId,
        group_id: GroupId,
        restricted: bool,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.check(StoreOp::SetRestricted)?;
        self.inner
            .set_restricted(user_id, group_id, restricted, at)
            .await
    }

    async fn swap_welcome_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        expected: Option<MessageId>,
        new: Option<MessageId>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.check(StoreOp::SwapWelcome)?;
        self.inner
            .swap_welcome_message(user_id, group_id, expected, new, at)
            .await
    }

    async fn list_restricted(&self, group_id: GroupId) -> StorageResult<Vec<Membership>> {
        self.check(StoreOp::ListRestricted)?;
        self.inner.list_restricted(group_id).await
    }
}

#[async_trait]
impl AdminAuditStore for FaultyStore {
    async fn append_admin_command(
        &self,
        entry: AdminCommandAppend,
    ) -> StorageResult<AdminCommandRecord> {
        self.check(StoreOp::AppendAdminCommand)?;
        self.inner.append_admin_command(entry).await
    }

    async fn list_admin_commands(
        &self,
        group_id: GroupId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AdminCommandRecord>> {
        self.inner.list_admin_commands(group_id, window).await
    }
}

#[async_trait]
impl ConversationStore for FaultyStore {
    async fn append_turn(&self, turn: ConversationAppend) -> StorageResult<ConversationTurn> {
        self.check(StoreOp::AppendTurn)?;
        self.inner.append_turn(turn).await
    }

    async fn recent_turns(
        &self,
        user_id: UserId,
        group_id: GroupId,
        limit: usize,
    ) -> StorageResult<Vec<ConversationTurn>> {
        self.check(StoreOp::RecentTurns)?;
        self.inner.recent_turns(user_id, group_id, limit).await
    }

    async fn purge_turns_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        self.inner.purge_turns_before(cutoff).await
    }
}

pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub gateway: Arc<RecordingGateway>,
    pub provider: Arc<ScriptedProvider>,
    pub ledger: MembershipLedger,
    pub bridge: ConversationBridge,
    pub controller: GateController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provider(ScriptedProvider::new([]))
    }

    pub fn with_provider(provider: Arc<ScriptedProvider>) -> Self {
        let delivery = DeliveryConfig {
            base_delay_ms: 10,
            notice_delay_ms: 10,
            ..DeliveryConfig::default()
        };
        Self::build(provider, ConversationConfig::default(), delivery)
    }

    pub fn build(
        provider: Arc<ScriptedProvider>,
        conversation: ConversationConfig,
        delivery: DeliveryConfig,
    ) -> Self {
        let store = Arc::new(FaultyStore::default());
        let gateway = RecordingGateway::new();
        let ledger = MembershipLedger::new(store.clone(), GateConfig::default());
        let bridge = ConversationBridge::new(
            store.clone(),
            provider.clone(),
            gateway.clone(),
            &conversation,
            &delivery,
        );
        let controller = GateController::new(ledger.clone(), gateway.clone(), bridge.clone(), BOT);
        Self {
            store,
            gateway,
            provider,
            ledger,
            bridge,
            controller,
        }
    }

    pub async fn dispatch(&self, event: InboundEvent) {
        self.controller.dispatch(event).await;
    }

    pub async fn self_join(&self, user: i64) {
        self.dispatch(InboundEvent::Membership(join_event(user, user)))
            .await;
    }

    pub async fn invite(&self, inviter: i64, user: i64) {
        self.dispatch(InboundEvent::Membership(join_event(user, inviter)))
            .await;
    }

    pub async fn say(&self, user: i64, message_id: i64, text: &str) {
        self.dispatch(InboundEvent::from_message(
            group_message(user, message_id, text),
            Some("gatebot"),
        ))
        .await;
    }

    pub async fn press(&self, presser: i64, payload: &str) {
        self.dispatch(InboundEvent::Control(ControlEvent {
            control_id: format!("cb-{presser}"),
            presser: actor(presser),
            payload: payload.to_string(),
            origin: None,
        }))
        .await;
    }

    pub async fn set_quota(&self, required: u32) {
        self.ledger.upsert_settings(GROUP, required).await.unwrap();
    }
}

pub fn actor(id: i64) -> Actor {
    Actor {
        id: UserId(id),
        username: Some(format!("user{id}")),
        first_name: None,
        is_bot: false,
    }
}

/// `subject` joins the group; `by == subject` is a self-join.
pub fn join_event(subject: i64, by: i64) -> MembershipEvent {
    MembershipEvent {
        group_id: GROUP,
        subject: actor(subject),
        actor: Some(actor(by)),
        old_status: MemberStatus::Left,
        new_status: MemberStatus::Member,
    }
}

pub fn group_message(user: i64, message_id: i64, text: &str) -> MessageEvent {
    MessageEvent {
        scope: ChatScope::Group(GROUP),
        message_id: MessageId(message_id),
        sender: actor(user),
        text: Some(text.to_string()),
    }
}
