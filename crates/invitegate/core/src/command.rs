//! Slash-command parsing.

/// Commands the bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/set_required_users <n>`; the raw argument is validated by the
    /// controller.
    SetRequiredUsers { argument: Option<String> },
    GrandfatherExisting,
    Status,
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetRequiredUsers { .. } => "set_required_users",
            Command::GrandfatherExisting => "grandfather_existing",
            Command::Status => "status",
            Command::Help => "help",
        }
    }

    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Help)
    }

    /// Parse `text` as a command addressed to this bot.
    ///
    /// `/cmd@other_bot` is not ours when `bot_username` is known. Unknown
    /// commands return `None` and are treated as ordinary messages.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = match head.split_once('@') {
            Some((name, mention)) => {
                if let Some(bot) = bot_username {
                    if !mention.eq_ignore_ascii_case(bot.trim_start_matches('@')) {
                        return None;
                    }
                }
                name
            }
            None => head,
        };

        match name {
            "set_required_users" => Some(Command::SetRequiredUsers {
                argument: (!args.is_empty()).then(|| args.to_string()),
            }),
            "grandfather_existing" => Some(Command::GrandfatherExisting),
            "status" => Some(Command::Status),
            "help" | "start" => Some(Command::Help),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_argument_and_mention() {
        assert_eq!(
            Command::parse("/set_required_users 7", None),
            Some(Command::SetRequiredUsers {
                argument: Some("7".to_string())
            })
        );
        assert_eq!(
            Command::parse("/set_required_users@GateBot  abc ", Some("gatebot")),
            Some(Command::SetRequiredUsers {
                argument: Some("abc".to_string())
            })
        );
        assert_eq!(
            Command::parse("/set_required_users", None),
            Some(Command::SetRequiredUsers { argument: None })
        );
    }

    #[test]
    fn ignores_other_bots_and_unknown_commands() {
        assert_eq!(Command::parse("/status@otherbot", Some("gatebot")), None);
        assert_eq!(Command::parse("/weather", None), None);
        assert_eq!(Command::parse("status", None), None);
    }

    #[test]
    fn help_is_open_to_everyone() {
        let help = Command::parse("/help", None).unwrap();
        assert!(!help.requires_admin());
        assert!(Command::GrandfatherExisting.requires_admin());
    }
}
