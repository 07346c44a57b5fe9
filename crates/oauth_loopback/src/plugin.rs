//! The oauth plugin: permission-checked `start` and `cancel` commands
//!
//! [`OAuthPlugin`] is what a host application embeds. The host hands it the
//! permissions it granted (any [`CommandGuard`]), its configuration value for
//! the plugin, and an [`EventSink`] to receive `oauth://response` events.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oauth_loopback::error::OAuthError;
//! use oauth_loopback::permissions::PermissionSet;
//! use oauth_loopback::plugin::{EventSink, OAuthPlugin};
//! use serde_json::json;
//!
//! struct PrintSink;
//!
//! impl EventSink for PrintSink {
//!     fn emit(&self, event: &str, payload: String) -> Result<(), OAuthError> {
//!         println!("{}: {}", event, payload);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), OAuthError> {
//! let plugin = OAuthPlugin::builder()
//!     .permissions(
//!         PermissionSet::builder()
//!             .grants(["oauth:allow-start", "oauth:allow-cancel"])
//!             .build()?,
//!     )
//!     .build();
//!
//! let port = plugin.start(Arc::new(PrintSink), None).await?;
//! let _ = plugin
//!     .invoke(Arc::new(PrintSink), "cancel", json!({ "port": port }))
//!     .await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::command::Command;
use crate::config::OAuthConfig;
use crate::error::OAuthError;
use crate::permissions::{CommandGuard, PermissionRegistry, PermissionSet};
use crate::server::{self, ServerHandle};

/// Plugin name, also the permission namespace
pub const PLUGIN_NAME: &str = "oauth";

/// Event emitted for every callback the server receives
pub const RESPONSE_EVENT: &str = "oauth://response";

/// Receives events the plugin emits to its host
///
/// Called from a tokio task; implementations should not block.
pub trait EventSink: Send + Sync {
    /// Deliver `payload` under the event name `event`
    fn emit(&self, event: &str, payload: String) -> Result<(), OAuthError>;
}

#[derive(Debug, Default, Deserialize)]
struct StartArgs {
    #[serde(default)]
    config: Option<OAuthConfig>,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    port: u16,
}

/// The oauth plugin instance
///
/// Tracks the servers it started, keyed by port.
pub struct OAuthPlugin {
    guard: Arc<dyn CommandGuard>,
    plugin_config: Value,
    servers: Mutex<HashMap<u16, ServerHandle>>,
}

impl OAuthPlugin {
    /// Create a new builder for configuring the plugin.
    pub fn builder() -> OAuthPluginBuilder {
        OAuthPluginBuilder::default()
    }

    /// The plugin's permission table
    pub fn permissions(&self) -> PermissionRegistry {
        PermissionRegistry::oauth()
    }

    async fn authorize(&self, command: Command) -> Result<(), OAuthError> {
        if self.guard.check(command).await? {
            Ok(())
        } else {
            warn!(%command, "Command rejected by granted permissions");
            Err(OAuthError::PermissionDenied {
                command: command.to_string(),
            })
        }
    }

    /// Run the `start` command.
    ///
    /// If `config.response` is unset, the host's plugin configuration value is
    /// used (see [`OAuthConfig::with_plugin_fallback`]), then the library
    /// default. Each callback is emitted to `sink` as [`RESPONSE_EVENT`].
    ///
    /// # Errors
    ///
    /// - [`OAuthError::PermissionDenied`] if `start` is not permitted; no port
    ///   is bound in that case
    /// - any error from [`server::start`]
    pub async fn start(
        &self,
        sink: Arc<dyn EventSink>,
        config: Option<OAuthConfig>,
    ) -> Result<u16, OAuthError> {
        self.authorize(Command::Start).await?;
        self.spawn_server(sink, config).await
    }

    async fn spawn_server(
        &self,
        sink: Arc<dyn EventSink>,
        config: Option<OAuthConfig>,
    ) -> Result<u16, OAuthError> {
        let config = config
            .unwrap_or_default()
            .with_plugin_fallback(&self.plugin_config);

        let handle = server::start(config, move |callback| {
            if let Err(e) = sink.emit(RESPONSE_EVENT, callback.into_payload()) {
                error!("Error emitting {} event: {}", RESPONSE_EVENT, e);
            }
        })
        .await?;

        let port = handle.port();
        let mut servers = self.servers.lock().await;
        servers.retain(|_, server| server.is_running());
        servers.insert(port, handle);

        debug!(port, "Started redirect server");
        Ok(port)
    }

    /// Run the `cancel` command.
    ///
    /// Servers started by this plugin are stopped directly; any other port
    /// is sent the exit marker.
    ///
    /// # Errors
    ///
    /// - [`OAuthError::PermissionDenied`] if `cancel` is not permitted
    /// - [`OAuthError::Cancel`] if nothing is listening on `port`
    pub async fn cancel(&self, port: u16) -> Result<(), OAuthError> {
        self.authorize(Command::Cancel).await?;
        self.stop_server(port).await
    }

    async fn stop_server(&self, port: u16) -> Result<(), OAuthError> {
        let tracked = self.servers.lock().await.remove(&port);
        match tracked {
            Some(handle) if handle.is_running() => {
                handle.shutdown();
                handle.closed().await;
                Ok(())
            }
            _ => server::cancel(port).await,
        }
    }

    /// Ports of servers started by this plugin that are still running
    pub async fn running_ports(&self) -> Vec<u16> {
        let servers = self.servers.lock().await;
        let mut ports: Vec<u16> = servers
            .values()
            .filter(|server| server.is_running())
            .map(ServerHandle::port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Route a host invocation by command name.
    ///
    /// - `start` takes `{"config": {...}}` (optional) and returns the port
    /// - `cancel` takes `{"port": N}` and returns `null`
    ///
    /// Errors are returned as their display strings.
    pub async fn invoke(
        &self,
        sink: Arc<dyn EventSink>,
        command: &str,
        args: Value,
    ) -> Result<Value, String> {
        self.dispatch(sink, command, args)
            .await
            .map_err(|e| e.to_string())
    }

    async fn dispatch(
        &self,
        sink: Arc<dyn EventSink>,
        command: &str,
        args: Value,
    ) -> Result<Value, OAuthError> {
        let command = command.parse::<Command>()?;
        self.authorize(command).await?;

        match command {
            Command::Start => {
                let args: StartArgs = if args.is_null() {
                    StartArgs::default()
                } else {
                    serde_json::from_value(args)?
                };
                let port = self.spawn_server(sink, args.config).await?;
                Ok(Value::from(port))
            }
            Command::Cancel => {
                let args: CancelArgs = serde_json::from_value(args)?;
                self.stop_server(args.port).await?;
                Ok(Value::Null)
            }
        }
    }
}

/// Builder for [`OAuthPlugin`].
///
/// Without a guard, every command is denied.
#[derive(Default)]
pub struct OAuthPluginBuilder {
    guard: Option<Arc<dyn CommandGuard>>,
    plugin_config: Option<Value>,
}

impl OAuthPluginBuilder {
    /// Use a custom guard.
    pub fn guard(mut self, guard: impl CommandGuard + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Use the permissions the host granted.
    pub fn permissions(self, permissions: PermissionSet) -> Self {
        self.guard(permissions)
    }

    /// The host's configuration value for this plugin.
    pub fn plugin_config(mut self, config: Value) -> Self {
        self.plugin_config = Some(config);
        self
    }

    /// Build the plugin.
    pub fn build(self) -> OAuthPlugin {
        let guard = self
            .guard
            .unwrap_or_else(|| Arc::new(PermissionSet::deny_all()));

        OAuthPlugin {
            guard,
            plugin_config: self.plugin_config.unwrap_or(Value::Null),
            servers: Mutex::new(HashMap::new()),
        }
    }
}
