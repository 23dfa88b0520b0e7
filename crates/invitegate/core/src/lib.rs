//! invitegate core: the invite-quota gate for group chats.
//!
//! New members stay restricted until they have added a configurable number
//! of other members. This crate holds the state machine and the pieces it is
//! wired from:
//! - [`MembershipLedger`]: per-(user, group) restriction and invite state
//! - [`GateController`]: decides the ledger mutation and platform action for
//!   each [`InboundEvent`]
//! - [`ConversationBridge`]: forwards unrestricted members' text to a
//!   [`CompletionProvider`] with bounded history
//! - [`RetentionSweeper`]: drops expired conversation history
//!
//! Platform and model backends plug in through [`MessagingGateway`] and
//! [`CompletionProvider`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod bridge;
mod command;
mod completion;
mod config;
mod control;
mod controller;
mod error;
mod events;
mod gateway;
mod housekeeping;
mod ledger;
pub mod messages;
mod retry;

pub use bridge::ConversationBridge;
pub use command::Command;
pub use completion::{CompletionProvider, CompletionRequest, HistoryEntry, ModelTier};
pub use config::{ConversationConfig, DeliveryConfig, GateConfig};
pub use control::{ControlPayload, MalformedPayload};
pub use controller::GateController;
pub use error::{
    DeliveryError, ErrorKind, GateError, GateResult, ProviderFailure, ValidationError,
};
pub use events::{
    Actor, ChatScope, CommandEvent, ControlEvent, InboundEvent, MemberStatus, MembershipChange,
    MembershipEvent, MessageEvent,
};
pub use gateway::{
    InteractiveControl, MemberPermissions, MessageHandle, MessageTarget, MessagingGateway,
    OutboundMessage,
};
pub use housekeeping::RetentionSweeper;
pub use ledger::MembershipLedger;
pub use retry::{RetryPolicy, Transient};
