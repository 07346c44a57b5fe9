//! Permission descriptors and parsed permission identifiers.

use std::fmt;

use serde::Serialize;

use crate::error::OAuthError;

/// One row of a permission table: an identifier and what granting it does.
///
/// Descriptors are authored at compile time (usually through
/// [`command_permissions!`](crate::command_permissions)) and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PermissionDescriptor {
    /// Namespaced identifier, e.g. `oauth:allow-start`
    pub identifier: &'static str,
    /// Human-readable effect of granting the identifier
    pub description: &'static str,
}

impl PermissionDescriptor {
    /// Create a descriptor. Usable in `const` and `static` items.
    pub const fn new(identifier: &'static str, description: &'static str) -> Self {
        Self {
            identifier,
            description,
        }
    }

    /// Parse the identifier into its namespace, effect and command.
    pub fn id(&self) -> Result<PermissionId, OAuthError> {
        PermissionId::parse(self.identifier)
    }
}

/// Owned counterpart of [`PermissionDescriptor`], produced when reading a
/// table from text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedDescriptor {
    /// Namespaced identifier
    pub identifier: String,
    /// Human-readable description
    pub description: String,
}

impl From<&PermissionDescriptor> for OwnedDescriptor {
    fn from(descriptor: &PermissionDescriptor) -> Self {
        Self {
            identifier: descriptor.identifier.to_string(),
            description: descriptor.description.to_string(),
        }
    }
}

/// Whether a permission grants or revokes a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// `allow-<command>`
    Allow,
    /// `deny-<command>`
    Deny,
}

impl Effect {
    /// Prefix used in identifiers (without the trailing dash)
    pub fn as_prefix(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

/// A parsed `<namespace>:<allow|deny>-<command>` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionId {
    /// Plugin namespace, e.g. `oauth`
    pub namespace: String,
    /// Allow or deny
    pub effect: Effect,
    /// Command name, e.g. `start`
    pub command: String,
}

impl PermissionId {
    /// Build an identifier from its parts
    pub fn new(namespace: impl Into<String>, effect: Effect, command: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            effect,
            command: command.into(),
        }
    }

    /// Parse an identifier string.
    ///
    /// ```
    /// use oauth_loopback::permissions::{Effect, PermissionId};
    ///
    /// let id = PermissionId::parse("oauth:deny-cancel").unwrap();
    /// assert_eq!(id.namespace, "oauth");
    /// assert_eq!(id.effect, Effect::Deny);
    /// assert_eq!(id.command, "cancel");
    /// ```
    pub fn parse(identifier: &str) -> Result<Self, OAuthError> {
        let (namespace, effect, command) = split_identifier(identifier)?;
        Ok(Self::new(namespace, effect, command))
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}",
            self.namespace,
            self.effect.as_prefix(),
            self.command
        )
    }
}

/// Split an identifier into borrowed parts without allocating.
pub(crate) fn split_identifier(identifier: &str) -> Result<(&str, Effect, &str), OAuthError> {
    let invalid = |reason: &str| OAuthError::InvalidPermission {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    let (namespace, rest) = identifier
        .split_once(':')
        .ok_or_else(|| invalid("missing ':' separator"))?;

    if namespace.is_empty() {
        return Err(invalid("empty namespace"));
    }

    let (effect, command) = if let Some(command) = rest.strip_prefix("allow-") {
        (Effect::Allow, command)
    } else if let Some(command) = rest.strip_prefix("deny-") {
        (Effect::Deny, command)
    } else {
        return Err(invalid("expected 'allow-' or 'deny-' after the namespace"));
    };

    if command.is_empty() {
        return Err(invalid("empty command name"));
    }
    if command.contains(':') {
        return Err(invalid("command name must not contain ':'"));
    }

    Ok((namespace, effect, command))
}
