//! Telegram transport for invitegate.
//!
//! - [`TelegramGateway`] implements the core [`MessagingGateway`] over the
//!   Bot HTTP API
//! - [`UpdatePoller`] long-polls `getUpdates` and yields typed
//!   [`InboundEvent`]s
//!
//! [`MessagingGateway`]: invitegate_core::MessagingGateway
//! [`InboundEvent`]: invitegate_core::InboundEvent

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod api;
mod error;
mod gateway;
pub mod types;
mod updates;

pub use api::{BotApi, BotIdentity, TelegramConfig, ALLOWED_UPDATES, DEFAULT_API_BASE};
pub use error::{TelegramError, TelegramResult};
pub use gateway::{send_message_body, TelegramGateway};
pub use updates::{classify_update, UpdatePoller};
