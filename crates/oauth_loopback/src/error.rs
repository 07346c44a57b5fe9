//! Error types for oauth_loopback
//!
//! This module defines the error hierarchy for the oauth_loopback crate using `thiserror`.
//! All operations that can fail return `Result<T, OAuthError>`.
//!
//! # Error Variants
//!
//! - [`OAuthError::Io`]: Socket and I/O failures (auto-converts from `std::io::Error`)
//! - [`OAuthError::Bind`]: None of the requested localhost ports could be bound
//! - [`OAuthError::Cancel`]: The server behind a port could not be reached to stop it
//! - [`OAuthError::InvalidConfig`]: Server configuration is unusable
//! - [`OAuthError::InvalidPermission`]: A permission identifier is malformed
//! - [`OAuthError::UnknownPermission`]: A granted identifier is not in the registry
//! - [`OAuthError::InvalidRegistry`]: A permission table breaks its allow/deny invariants
//! - [`OAuthError::PermissionDenied`]: A command was invoked without being permitted
//! - [`OAuthError::UnknownCommand`]: The plugin was asked to run a command it doesn't have
//! - [`OAuthError::Json`]: JSON decoding errors (auto-converts from `serde_json::Error`)
//! - [`OAuthError::Emit`]: The host rejected an emitted event
//!
//! # Example
//!
//! ```rust
//! use oauth_loopback::error::OAuthError;
//!
//! fn example() -> Result<(), OAuthError> {
//!     // Auto-conversion from serde_json::Error
//!     let _value: serde_json::Value = serde_json::from_str("{}")?;
//!
//!     // Manual construction
//!     Err(OAuthError::UnknownCommand("refresh".to_string()))
//! }
//! ```

use thiserror::Error;

/// The main error type for all oauth_loopback operations
///
/// Two variants support automatic conversion via the `?` operator:
/// - `Io` from `std::io::Error`
/// - `Json` from `serde_json::Error`
#[derive(Error, Debug)]
pub enum OAuthError {
    /// I/O operation failed
    ///
    /// Covers listener setup, reading requests and writing responses.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// None of the configured ports could be bound on 127.0.0.1
    #[error("Failed to bind localhost server on any of the ports {ports:?}: {source}")]
    Bind {
        /// The ports that were tried, in order
        ports: Vec<u16>,
        /// Error from the last bind attempt
        #[source]
        source: std::io::Error,
    },

    /// Failed to reach the server that should be cancelled
    #[error("Failed to cancel server on port {port}: {source}")]
    Cancel {
        /// Port the server was expected to listen on
        port: u16,
        /// Underlying connection error
        #[source]
        source: std::io::Error,
    },

    /// Server configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A permission identifier does not follow `<namespace>:<allow|deny>-<command>`
    #[error("Invalid permission identifier '{identifier}': {reason}")]
    InvalidPermission {
        /// The identifier as given
        identifier: String,
        /// What is wrong with it
        reason: String,
    },

    /// A permission identifier is well-formed but not part of the registry
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    /// A permission table violates uniqueness or allow/deny pairing
    #[error("Invalid permission table: {0}")]
    InvalidRegistry(String),

    /// The command is not permitted by the granted permissions
    #[error("Command '{command}' is not allowed")]
    PermissionDenied {
        /// Name of the rejected command (e.g. "start")
        command: String,
    },

    /// The plugin has no command with this name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Failed to decode JSON
    ///
    /// Automatically converted from `serde_json::Error` when reading plugin
    /// configuration or command arguments.
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Emitting an event to the host failed
    #[error("Failed to emit event: {0}")]
    Emit(String),
}
