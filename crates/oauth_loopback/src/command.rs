//! The commands exposed by the oauth plugin.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OAuthError;

/// A command the plugin can run on behalf of its host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Start a localhost redirect server
    Start,
    /// Stop a running redirect server
    Cancel,
}

impl Command {
    /// All commands, in the order their permissions are listed
    pub const ALL: [Command; 2] = [Command::Cancel, Command::Start];

    /// Command name as used in permission identifiers and `invoke`
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Command {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Command::Start),
            "cancel" => Ok(Command::Cancel),
            other => Err(OAuthError::UnknownCommand(other.to_string())),
        }
    }
}
