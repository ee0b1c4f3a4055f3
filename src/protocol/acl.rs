//! # Access Control
//!
//! Decides whether a `(command, token)` pair may be executed.
//!
//! Two principals exist:
//! - the anonymous principal, selected by an empty token
//! - the privileged principal, selected by a token equal to the configured shared secret;
//!   it may run everything the anonymous principal may run plus its own list
//!
//! Any other token is denied every command. Lookups never fail: a command missing from
//! a list is simply not allowed.

use std::collections::HashSet;

use crate::config::AclConfig;
use crate::core::packet::Command;
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone)]
struct Principal {
    token: String,
    allowed: HashSet<Command>,
}

/// Allow-lists for the anonymous and privileged principals
#[derive(Debug, Clone)]
pub struct Acl {
    anonymous: HashSet<Command>,
    privileged: Option<Principal>,
}

impl Default for Acl {
    fn default() -> Self {
        Self::new([Command::Hello, Command::Exit, Command::Get])
    }
}

impl Acl {
    /// ACL with only an anonymous principal
    pub fn new(anonymous: impl IntoIterator<Item = Command>) -> Self {
        Self {
            anonymous: anonymous.into_iter().collect(),
            privileged: None,
        }
    }

    /// Add the privileged principal identified by `token`
    pub fn with_privileged(
        mut self,
        token: impl Into<String>,
        allowed: impl IntoIterator<Item = Command>,
    ) -> Self {
        self.privileged = Some(Principal {
            token: token.into(),
            allowed: allowed.into_iter().collect(),
        });
        self
    }

    /// Build from the `[acl]` configuration section
    pub fn from_config(config: &AclConfig) -> Result<Self> {
        let anonymous = parse_commands(&config.anonymous_commands)?;
        let acl = Self::new(anonymous);

        match config.shared_secret.as_deref() {
            None => Ok(acl),
            Some("") => Err(ProtocolError::ConfigError(
                "acl.shared_secret must not be empty".to_string(),
            )),
            Some(secret) => Ok(acl.with_privileged(
                secret,
                parse_commands(&config.privileged_commands)?,
            )),
        }
    }

    /// Whether `token` may issue `command`
    pub fn authorize(&self, command: Command, token: &str) -> bool {
        if token.is_empty() {
            return self.anonymous.contains(&command);
        }

        match &self.privileged {
            Some(principal) if principal.token == token => {
                self.anonymous.contains(&command) || principal.allowed.contains(&command)
            }
            _ => false,
        }
    }
}

fn parse_commands(names: &[String]) -> Result<HashSet<Command>> {
    names.iter().map(|name| name.parse::<Command>()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn acl() -> Acl {
        Acl::default().with_privileged(
            "token",
            [Command::Hello, Command::Exit, Command::Id, Command::Set],
        )
    }

    #[test]
    fn anonymous_allow_list() {
        let acl = acl();
        assert!(acl.authorize(Command::Get, ""));
        assert!(acl.authorize(Command::Exit, ""));
        assert!(acl.authorize(Command::Hello, ""));
        assert!(!acl.authorize(Command::Set, ""));
        assert!(!acl.authorize(Command::Id, ""));
    }

    #[test]
    fn privileged_gets_union() {
        let acl = acl();
        assert!(acl.authorize(Command::Set, "token"));
        assert!(acl.authorize(Command::Id, "token"));
        assert!(acl.authorize(Command::Get, "token"));
    }

    #[test]
    fn unknown_token_denied_everything() {
        let acl = acl();
        for code in 0..=u8::MAX {
            assert!(!acl.authorize(Command::from(code), "wrong"));
        }
    }

    #[test]
    fn unknown_command_denied() {
        assert!(!acl().authorize(Command::Unknown(99), "token"));
        assert!(!acl().authorize(Command::Unknown(99), ""));
    }

    #[test]
    fn without_secret_every_token_is_denied() {
        let acl = Acl::default();
        assert!(!acl.authorize(Command::Get, "token"));
        assert!(acl.authorize(Command::Get, ""));
    }

    #[test]
    fn from_config_parses_names() {
        let config = AclConfig {
            shared_secret: Some("s3cret".into()),
            anonymous_commands: vec!["hello".into(), "GET".into()],
            privileged_commands: vec!["SET".into()],
        };
        let acl = Acl::from_config(&config).unwrap();
        assert!(acl.authorize(Command::Set, "s3cret"));
        assert!(!acl.authorize(Command::Set, ""));
        assert!(!acl.authorize(Command::Exit, ""));
    }

    #[test]
    fn from_config_rejects_bad_input() {
        let mut config = AclConfig {
            shared_secret: Some(String::new()),
            ..AclConfig::default()
        };
        assert!(Acl::from_config(&config).is_err());

        config.shared_secret = None;
        config.anonymous_commands.push("TELEPORT".into());
        assert!(Acl::from_config(&config).is_err());
    }
}
