//! invitegate storage abstractions.
//!
//! This crate defines the storage contract the gatekeeper core runs on:
//! - per-group settings (the invite quota)
//! - per-(user, group) memberships (restriction and invite state)
//! - append-only admin command audit
//! - bounded conversation history for the assistant bridge
//!
//! Every mutation is a single keyed statement so concurrent event handlers
//! converge without application-level locks.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{
    AdminCommandAppend, AdminCommandRecord, ConversationAppend, ConversationTurn, GroupId,
    GroupSettings, Membership, MessageId, NewMembership, TurnRole, UserId,
};
pub use traits::{
    AdminAuditStore, ConversationStore, GatekeeperStorage, GroupSettingsStore, MembershipStore,
    QueryWindow,
};
