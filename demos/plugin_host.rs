//! Plugin host — embed the oauth plugin the way a desktop host would.
//!
//! This example demonstrates:
//! - `PermissionSet::from_json()` — load the grants a host capability file lists
//! - `CommandGuard` — a custom guard that logs each decision
//! - `OAuthPlugin::invoke()` — JSON command routing with string errors
//! - `EventSink` — receiving `oauth://response` events
//!
//! ## Run
//! ```sh
//! cargo run -p demos --example plugin_host
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use oauth_loopback::prelude::*;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// Wraps granted permissions and prints every decision.
struct LoggingGuard {
    inner: PermissionSet,
}

#[async_trait]
impl CommandGuard for LoggingGuard {
    async fn check(&self, command: Command) -> Result<bool, OAuthError> {
        let allowed = self.inner.check(command).await?;
        println!(
            "  [Permission] {}: {}",
            if allowed { "ALLOW" } else { "DENY " },
            command
        );
        Ok(allowed)
    }
}

/// Forwards emitted events to the main task.
struct ChannelSink(mpsc::UnboundedSender<(String, String)>);

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: String) -> Result<(), OAuthError> {
        self.0
            .send((event.to_string(), payload))
            .map_err(|e| OAuthError::Emit(e.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth_loopback=warn".parse().unwrap()),
        )
        .with_target(false)
        .init();

    println!("=== Plugin Host Example ===\n");

    // --- 1. Grants from a capability file ---
    let grants = PermissionSet::from_json(
        r#"{ "permissions": ["oauth:allow-start", "oauth:allow-cancel"] }"#,
    )?;

    let plugin = OAuthPlugin::builder()
        .guard(LoggingGuard { inner: grants })
        .plugin_config(json!("<html><body>Back to the app!</body></html>"))
        .build();

    let (tx, mut events) = mpsc::unbounded_channel();
    let sink: Arc<dyn EventSink> = Arc::new(ChannelSink(tx));

    // --- 2. start ---
    println!("invoke(\"start\")");
    let port = plugin
        .invoke(Arc::clone(&sink), "start", json!({}))
        .await?
        .as_u64()
        .ok_or("start returned a non-numeric port")? as u16;
    println!("  -> port {}\n", port);

    // --- 3. Simulate the browser redirect ---
    let mut browser = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    browser
        .write_all(b"GET /callback?code=xyz HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await?;
    let mut page = String::new();
    browser.read_to_string(&mut page).await?;
    println!("Browser received:\n{}\n", page);

    if let Some((event, payload)) = events.recv().await {
        println!("Host event {} -> {}\n", event, payload);
    }

    // --- 4. Errors come back as strings ---
    println!("invoke(\"refresh\")");
    if let Err(e) = plugin.invoke(Arc::clone(&sink), "refresh", json!({})).await {
        println!("  -> error: {}\n", e);
    }

    // --- 5. cancel ---
    println!("invoke(\"cancel\")");
    plugin
        .invoke(sink, "cancel", json!({ "port": port }))
        .await?;
    println!("  -> stopped; running servers: {:?}", plugin.running_ports().await);

    Ok(())
}
