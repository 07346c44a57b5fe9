//! Configuration for the localhost redirect server
//!
//! This module provides `OAuthConfig`, which controls which ports the server
//! may bind and which HTML page is sent back to the browser after a redirect.
//!
//! # Example
//!
//! ```
//! use oauth_loopback::config::OAuthConfig;
//!
//! let config = OAuthConfig::builder()
//!     .ports(vec![8000, 8001, 8002])
//!     .response("<html><body>Signed in, you can close this tab.</body></html>")
//!     .build();
//!
//! assert_eq!(config.ports.as_deref(), Some(&[8000, 8001, 8002][..]));
//! ```
//!
//! # JSON
//!
//! Hosts pass the config as JSON. Every field is optional:
//!
//! ```
//! use oauth_loopback::config::OAuthConfig;
//!
//! let config = OAuthConfig::from_json(r#"{"ports": [8000]}"#).unwrap();
//! assert_eq!(config.ports, Some(vec![8000]));
//! assert!(config.response.is_none());
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OAuthError;

/// HTML sent to the browser when no response is configured
pub const DEFAULT_RESPONSE: &str = "<html><body>Please return to the app.</body></html>";

/// The optional server config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Hard-coded ports the server should try to bind to, in order.
    ///
    /// Only use this if the OAuth provider does not accept wildcard localhost
    /// redirect URLs. `None` asks the system for a free port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,

    /// Static HTML sent to the user after being redirected.
    ///
    /// Keep it self-contained and small. `None` falls back to
    /// [`DEFAULT_RESPONSE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Cow<'static, str>>,
}

impl OAuthConfig {
    /// Create a new config builder
    pub fn builder() -> OAuthConfigBuilder {
        OAuthConfigBuilder::default()
    }

    /// Parse a config from JSON
    pub fn from_json(json: &str) -> Result<Self, OAuthError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The configured response page or [`DEFAULT_RESPONSE`]
    pub fn response_or_default(&self) -> &str {
        self.response.as_deref().unwrap_or(DEFAULT_RESPONSE)
    }

    /// Fill in `response` from the host's configuration value for this plugin.
    ///
    /// Accepted forms: a JSON string (used as the page), or an object with a
    /// string `response` field. An explicitly configured `response` always
    /// wins. Any other shape leaves the config untouched.
    ///
    /// ```
    /// use oauth_loopback::config::OAuthConfig;
    /// use serde_json::json;
    ///
    /// let config = OAuthConfig::default()
    ///     .with_plugin_fallback(&json!("<p>Done</p>"));
    /// assert_eq!(config.response_or_default(), "<p>Done</p>");
    /// ```
    pub fn with_plugin_fallback(mut self, plugin_config: &Value) -> Self {
        if self.response.is_none() {
            let fallback = match plugin_config {
                Value::String(html) => Some(html.clone()),
                Value::Object(map) => map
                    .get("response")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            self.response = fallback.map(Cow::Owned);
        }
        self
    }

    /// Reject configurations that can never bind.
    pub fn validate(&self) -> Result<(), OAuthError> {
        if let Some(ports) = &self.ports {
            if ports.is_empty() {
                return Err(OAuthError::InvalidConfig(
                    "`ports` must list at least one port, or be omitted".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`OAuthConfig`]
#[derive(Debug, Default)]
pub struct OAuthConfigBuilder {
    ports: Option<Vec<u16>>,
    response: Option<Cow<'static, str>>,
}

impl OAuthConfigBuilder {
    /// Ports to try, in order
    pub fn ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    /// A single fixed port
    pub fn port(mut self, port: u16) -> Self {
        self.ports = Some(vec![port]);
        self
    }

    /// HTML page sent to the browser
    pub fn response(mut self, html: impl Into<Cow<'static, str>>) -> Self {
        self.response = Some(html.into());
        self
    }

    /// Build the config
    pub fn build(self) -> OAuthConfig {
        OAuthConfig {
            ports: self.ports,
            response: self.response,
        }
    }
}
