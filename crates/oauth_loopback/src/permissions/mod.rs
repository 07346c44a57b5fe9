//! Permission table and grant evaluation for the plugin's commands.
//!
//! Every command the plugin exposes has exactly two permissions: an
//! `allow-<command>` and a `deny-<command>` entry in the `oauth` namespace.
//!
//! | Identifier           | Description                                                  |
//! |----------------------|--------------------------------------------------------------|
//! | `oauth:allow-cancel` | Enables the cancel command without any pre-configured scope. |
//! | `oauth:deny-cancel`  | Denies the cancel command without any pre-configured scope.  |
//! | `oauth:allow-start`  | Enables the start command without any pre-configured scope.  |
//! | `oauth:deny-start`   | Denies the start command without any pre-configured scope.   |
//!
//! # Architecture
//!
//! - [`PermissionRegistry`] - the static table, generated by
//!   [`command_permissions!`](crate::command_permissions)
//! - [`PermissionSet`] - the identifiers a host granted, validated against the
//!   registry
//! - [`CommandGuard`] - the seam the plugin consults before running a command
//!
//! A granted permission set is evaluated through these layers:
//!
//! 1. **Explicit Deny** - `deny-<command>` rejects (highest priority)
//! 2. **Explicit Allow** - `allow-<command>` permits
//! 3. **Default Policy** - fall back to [`DefaultPolicy`]
//!
//! # Examples
//!
//! ```rust
//! use oauth_loopback::permissions::{PermissionRegistry, PermissionSet};
//!
//! let registry = PermissionRegistry::oauth();
//! registry.validate().unwrap();
//!
//! let grants = PermissionSet::builder()
//!     .grant("oauth:allow-start")
//!     .build()
//!     .unwrap();
//! assert!(grants.is_permitted("start"));
//! assert!(!grants.is_permitted("cancel"));
//! ```

mod descriptor;
mod grants;
mod registry;

pub use descriptor::{Effect, OwnedDescriptor, PermissionDescriptor, PermissionId};
pub use grants::{AllowAll, CommandGuard, DefaultPolicy, PermissionSet, PermissionSetBuilder};
pub use registry::PermissionRegistry;
