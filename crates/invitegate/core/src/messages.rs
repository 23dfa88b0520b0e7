//! User-facing texts.

use crate::error::{ErrorKind, GateError};
use chrono::{DateTime, Utc};

pub const RECHECK_BUTTON: &str = "I have added enough members";
pub const ACCESS_GRANTED: &str = "Congratulations! You can now post in the group. 🎉";
pub const ADMIN_ONLY: &str = "This command is only available to group administrators.";
pub const SERVICE_UNAVAILABLE: &str =
    "The assistant is not available right now, please try again later.";
pub const STORE_ERROR: &str = "A database error occurred. Please try again later.";
pub const GENERAL_ERROR: &str = "Something went wrong. Please try again later.";
pub const NOT_FOR_YOU: &str = "This button is not for you!";
pub const INVALID_DATA: &str = "Invalid data!";
pub const STATUS_NOT_CONFIGURED: &str = "This group has no settings yet.";
pub const GRANDFATHER_NONE: &str = "✅ No restricted members found.";

pub const HELP: &str = "Bot commands:

/set_required_users <n> - set how many members a newcomer must add (admins)
/grandfather_existing - lift the restriction for every current member (admins)
/status - show group settings (admins)
/help - show this help

Invite your friends to the group to unlock posting!";

pub fn welcome_prompt(display: &str, required: u32, current: u32) -> String {
    format!(
        "⚠️ {display}, to post in this group you need to add {required} members.\n\n\
         Added so far: {current}\nStill needed: {}",
        required.saturating_sub(current)
    )
}

pub fn restriction_notice(display: &str, current: u32, required: u32) -> String {
    format!(
        "{display}, you have not added enough members to post yet. \
         You added {current}, add {} more.",
        required.saturating_sub(current)
    )
}

pub fn still_not_enough(remaining: u32) -> String {
    format!("You still need to add {remaining} more members.")
}

pub fn group_success(display: &str) -> String {
    format!("🎉 {display}, success! You can now post in the group.")
}

pub fn access_granted_prompt() -> String {
    format!("✅ {ACCESS_GRANTED}")
}

pub fn invalid_range(min: u32, max: u32) -> String {
    format!("Please enter a number from {min} to {max}.")
}

pub fn required_updated(count: u32) -> String {
    format!("Group settings updated. New members now need to add {count} members.")
}

pub fn grandfathered(count: usize) -> String {
    format!("✅ {count} members were released from the restriction. Only new members will be restricted from now on.")
}

pub fn status(required: u32, restricted: usize, updated_at: DateTime<Utc>) -> String {
    format!(
        "📊 Group status\n\n\
         ⚙️ Required members: {required}\n\
         🚫 Restricted members: {restricted}\n\
         📅 Settings updated: {}",
        updated_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn reply_to(display: &str, text: &str) -> String {
    format!("{display}, {text}")
}

/// Reply shown for a failed command.
pub fn command_error(error: &GateError, min: u32, max: u32) -> String {
    match error.kind() {
        ErrorKind::PermissionDenied => ADMIN_ONLY.to_string(),
        ErrorKind::Validation => invalid_range(min, max),
        ErrorKind::Store => STORE_ERROR.to_string(),
        ErrorKind::NotConfigured | ErrorKind::Provider => SERVICE_UNAVAILABLE.to_string(),
        ErrorKind::TransientDelivery => GENERAL_ERROR.to_string(),
    }
}
