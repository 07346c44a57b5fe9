//! oauth_loopback - localhost OAuth redirect capture for desktop hosts
//!
//! This crate provides the `oauth` plugin: a tiny HTTP server bound to
//! `127.0.0.1` that catches the browser redirect at the end of an OAuth
//! authorization flow and hands the URL (or a posted body) back to the app.
//!
//! # Overview
//!
//! - A static allow/deny permission table for the plugin's commands
//! - Permission-checked `start` and `cancel` commands
//! - A tokio-based redirect server with fixed or OS-assigned ports
//! - `state` token helpers for verifying redirects
//!
//! # Architecture
//!
//! - `permissions`: the permission table and grant evaluation
//! - `server`: the localhost listener
//! - `plugin`: the host-facing command layer
//! - `config`: server configuration
//! - `state`: CSRF tokens
//! - `error`: error types and handling
//!
//! # Example
//!
//! ```rust,no_run
//! use oauth_loopback::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), OAuthError> {
//!     let state = OAuthState::generate();
//!     let expected = state.clone();
//!
//!     let handle = server::start(OAuthConfig::default(), move |callback| {
//!         if expected.verify(callback.payload()) {
//!             println!("Authorized: {}", callback.payload());
//!         }
//!     })
//!     .await?;
//!
//!     println!(
//!         "redirect_uri=http://127.0.0.1:{}/callback state={}",
//!         handle.port(),
//!         state
//!     );
//!     handle.closed().await;
//!     Ok(())
//! }
//! ```
//!
//! # License
//!
//! Licensed under MIT. See LICENSE file for details.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Lets generated code name this crate by its public path from inside the crate.
extern crate self as oauth_loopback;

// Re-export macros from oauth_loopback_macros
pub use oauth_loopback_macros::*;

/// Plugin commands
///
/// `Command` names the two commands the plugin runs: `start` and `cancel`.
pub mod command;

/// Configuration options and builder
///
/// This module provides `OAuthConfig` for choosing ports and the page shown
/// to the user after the redirect.
pub mod config;

/// Error types and utilities
///
/// This module defines the `OAuthError` enum, which covers every failure in
/// the crate, from binding the listener to permission checks.
pub mod error;

/// Permission table and grant evaluation
///
/// See `PermissionRegistry` for the static table and `PermissionSet` for
/// evaluating the permissions a host granted.
pub mod permissions;

/// Host-facing plugin with permission-checked commands
pub mod plugin;

/// Localhost redirect server
///
/// `start()` binds the listener and delivers callbacks; `cancel()` stops it
/// by port.
pub mod server;

/// CSRF `state` tokens
pub mod state;

// Prelude module for common imports
pub mod prelude {
    //! Common imports for oauth_loopback users
    //!
    //! Use `use oauth_loopback::prelude::*;` to import commonly used types.

    pub use crate::command::Command;
    pub use crate::config::OAuthConfig;
    pub use crate::error::OAuthError;
    pub use crate::permissions::{
        AllowAll, CommandGuard, DefaultPolicy, Effect, PermissionDescriptor, PermissionId,
        PermissionRegistry, PermissionSet,
    };
    pub use crate::plugin::{EventSink, OAuthPlugin, PLUGIN_NAME, RESPONSE_EVENT};
    pub use crate::server::{self, OAuthCallback, ServerHandle};
    pub use crate::state::OAuthState;
}
