//! Granted permissions and the command guard built on them.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::command::Command;
use crate::error::OAuthError;
use crate::permissions::descriptor::{split_identifier, Effect};
use crate::permissions::registry::PermissionRegistry;

/// Decides whether the plugin may run a command.
///
/// The plugin calls the guard before doing any work for a command.
///
/// # Example
///
/// ```
/// use oauth_loopback::command::Command;
/// use oauth_loopback::error::OAuthError;
/// use oauth_loopback::permissions::CommandGuard;
/// use async_trait::async_trait;
///
/// struct StartOnly;
///
/// #[async_trait]
/// impl CommandGuard for StartOnly {
///     async fn check(&self, command: Command) -> Result<bool, OAuthError> {
///         Ok(command == Command::Start)
///     }
/// }
/// ```
#[async_trait]
pub trait CommandGuard: Send + Sync {
    /// Check whether `command` may run
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Run the command
    /// * `Ok(false)` - Reject with [`OAuthError::PermissionDenied`]
    /// * `Err(...)` - Guard failure (command is rejected)
    async fn check(&self, command: Command) -> Result<bool, OAuthError>;
}

/// Guard that permits every command. For embedding without a host.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl CommandGuard for AllowAll {
    async fn check(&self, _command: Command) -> Result<bool, OAuthError> {
        Ok(true)
    }
}

/// What happens to a command with neither an allow nor a deny grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    /// Permit ungranted commands
    Allow,
    /// Reject ungranted commands
    #[default]
    Deny,
}

/// The set of permission identifiers a host granted to the plugin.
///
/// Evaluation order for a command:
///
/// 1. **Explicit Deny** - a granted `deny-<command>` rejects (highest priority)
/// 2. **Explicit Allow** - a granted `allow-<command>` permits
/// 3. **Default Policy** - [`DefaultPolicy`], `Deny` unless configured
///
/// # Examples
///
/// ```rust
/// use oauth_loopback::permissions::PermissionSet;
///
/// let set = PermissionSet::builder()
///     .grant("oauth:allow-start")
///     .grant("oauth:allow-cancel")
///     .grant("oauth:deny-cancel")
///     .build()
///     .unwrap();
///
/// assert!(set.is_permitted("start"));
/// assert!(!set.is_permitted("cancel")); // deny wins
/// ```
#[derive(Debug, Clone)]
pub struct PermissionSet {
    allowed: HashSet<String>,
    denied: HashSet<String>,
    default_policy: DefaultPolicy,
}

/// On-disk / host-provided form of a grant list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantFile {
    permissions: Vec<String>,
    #[serde(default)]
    default_policy: DefaultPolicy,
}

impl PermissionSet {
    /// Create a new builder for configuring the granted permissions.
    pub fn builder() -> PermissionSetBuilder {
        PermissionSetBuilder::default()
    }

    /// A set with no grants and the `Deny` default policy.
    pub fn deny_all() -> Self {
        Self {
            allowed: HashSet::new(),
            denied: HashSet::new(),
            default_policy: DefaultPolicy::Deny,
        }
    }

    /// Read grants from JSON of the form
    /// `{"permissions": ["oauth:allow-start"], "defaultPolicy": "deny"}`.
    /// Identifiers are checked against the oauth registry.
    pub fn from_json(json: &str) -> Result<Self, OAuthError> {
        let file: GrantFile = serde_json::from_str(json)?;
        file.permissions
            .into_iter()
            .fold(Self::builder(), |builder, id| builder.grant(id))
            .default_policy(file.default_policy)
            .build()
    }

    /// Check if a command is explicitly denied.
    fn is_denied(&self, command: &str) -> bool {
        self.denied.contains(command)
    }

    /// Check if a command is explicitly allowed.
    fn is_allowed(&self, command: &str) -> bool {
        self.allowed.contains(command)
    }

    /// Evaluate a command by name.
    pub fn is_permitted(&self, command: &str) -> bool {
        if self.is_denied(command) {
            return false;
        }
        if self.is_allowed(command) {
            return true;
        }
        self.default_policy == DefaultPolicy::Allow
    }

    /// The policy applied to ungranted commands
    pub fn default_policy(&self) -> DefaultPolicy {
        self.default_policy
    }
}

#[async_trait]
impl CommandGuard for PermissionSet {
    async fn check(&self, command: Command) -> Result<bool, OAuthError> {
        Ok(self.is_permitted(command.as_str()))
    }
}

/// Builder for [`PermissionSet`].
///
/// # Examples
///
/// ```rust
/// use oauth_loopback::permissions::{DefaultPolicy, PermissionSet};
///
/// let set = PermissionSet::builder()
///     .default_policy(DefaultPolicy::Allow)
///     .grant("oauth:deny-cancel")
///     .build()
///     .unwrap();
///
/// assert!(set.is_permitted("start"));
/// assert!(!set.is_permitted("cancel"));
/// ```
#[derive(Debug, Default)]
pub struct PermissionSetBuilder {
    registry: Option<PermissionRegistry>,
    grants: Vec<String>,
    default_policy: Option<DefaultPolicy>,
}

impl PermissionSetBuilder {
    /// Validate grants against a different registry (default: the oauth table).
    pub fn registry(mut self, registry: PermissionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Grant one permission identifier.
    pub fn grant(mut self, identifier: impl Into<String>) -> Self {
        self.grants.push(identifier.into());
        self
    }

    /// Grant several permission identifiers.
    pub fn grants<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants.extend(identifiers.into_iter().map(Into::into));
        self
    }

    /// Set the default policy.
    pub fn default_policy(mut self, policy: DefaultPolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Build the permission set.
    ///
    /// # Errors
    ///
    /// - [`OAuthError::InvalidPermission`] if a grant is malformed
    /// - [`OAuthError::UnknownPermission`] if a grant is not in the registry
    pub fn build(self) -> Result<PermissionSet, OAuthError> {
        let registry = self.registry.unwrap_or_else(PermissionRegistry::oauth);

        let mut allowed = HashSet::new();
        let mut denied = HashSet::new();

        for identifier in &self.grants {
            let (_, effect, command) = split_identifier(identifier)?;
            if registry.lookup(identifier).is_none() {
                return Err(OAuthError::UnknownPermission(identifier.clone()));
            }
            match effect {
                Effect::Allow => allowed.insert(command.to_string()),
                Effect::Deny => denied.insert(command.to_string()),
            };
        }

        Ok(PermissionSet {
            allowed,
            denied,
            default_policy: self.default_policy.unwrap_or_default(),
        })
    }
}
