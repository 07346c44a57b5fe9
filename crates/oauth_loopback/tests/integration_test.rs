//! Integration tests for oauth_loopback
//!
//! These tests drive the redirect server over real loopback sockets, the way a
//! browser and a host application would.
//!
//! # Test Structure
//!
//! - **Server Tests**: redirects, submissions, shutdown, port selection
//! - **Plugin Tests**: permission checks and `oauth://response` events
//! - **Table Tests**: the published permission table
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use oauth_loopback::prelude::*;

// ============================================================================
// Helper Functions
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

/// Send a raw request and read the full response
async fn send(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

fn get(path: &str, port: u16) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nConnection: close\r\n\r\n",
        path, port
    )
}

/// A port that was free a moment ago
async fn free_port() -> u16 {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    probe.local_addr().unwrap().port()
}

/// Collects emitted events
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, String)>>,
    notify: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl RecordingSink {
    fn with_notify() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            events: Mutex::new(Vec::new()),
            notify: Mutex::new(Some(tx)),
        };
        (Arc::new(sink), rx)
    }

    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: String) -> Result<(), OAuthError> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

// ============================================================================
// Server Tests
// ============================================================================

#[tokio::test]
async fn test_redirect_delivers_full_url() {
    let (handle, mut callbacks) = server::start_stream(OAuthConfig::default()).await.unwrap();
    let port = handle.port();

    let response = send(port, &get("/callback?code=abc&state=s1", port)).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("<html><body>Please return to the app.</body></html>"));

    let callback = timeout(WAIT, callbacks.next()).await.unwrap().unwrap();
    assert_eq!(
        callback,
        OAuthCallback::Redirect {
            url: format!("http://127.0.0.1:{}/callback?code=abc&state=s1", port)
        }
    );

    handle.shutdown();
}

#[tokio::test]
async fn test_custom_response_page() {
    let config = OAuthConfig::builder().response("<h1>Signed in</h1>").build();
    let (handle, _callbacks) = server::start_stream(config).await.unwrap();
    let port = handle.port();

    let response = send(port, &get("/cb", port)).await;
    assert!(response.ends_with("<h1>Signed in</h1>"));

    handle.shutdown();
}

#[tokio::test]
async fn test_submission_delivers_body() {
    let (handle, mut callbacks) = server::start_stream(OAuthConfig::default()).await.unwrap();
    let port = handle.port();

    let body = r#"{"access_token":"t0k3n"}"#;
    let request = format!(
        "POST /submit HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send(port, &request).await;
    assert!(response.contains("Access-Control-Allow-Origin: *"));
    assert!(response.ends_with("true"));

    let callback = timeout(WAIT, callbacks.next()).await.unwrap().unwrap();
    assert_eq!(callback.payload(), body);

    handle.shutdown();
}

#[tokio::test]
async fn test_handler_receives_callbacks_in_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = server::start(OAuthConfig::default(), move |callback| {
        let _ = tx.send(callback.into_payload());
    })
    .await
    .unwrap();
    let port = handle.port();

    send(port, &get("/first", port)).await;
    send(port, &get("/second", port)).await;

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(first.ends_with("/first"));
    assert!(second.ends_with("/second"));

    handle.shutdown();
}

#[tokio::test]
async fn test_exit_path_stops_without_callback() {
    let (handle, mut callbacks) = server::start_stream(OAuthConfig::default()).await.unwrap();
    let port = handle.port();

    send(port, &get("/exit", port)).await;
    timeout(WAIT, handle.closed()).await.unwrap();
    assert!(!handle.is_running());

    // The stream ends without ever yielding the exit request
    let next = timeout(WAIT, callbacks.next()).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_cancel_by_port() {
    let called = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&called);
    let handle = server::start(OAuthConfig::default(), move |_| {
        *flag.lock().unwrap() = true;
    })
    .await
    .unwrap();

    server::cancel(handle.port()).await.unwrap();
    timeout(WAIT, handle.closed()).await.unwrap();

    assert!(!*called.lock().unwrap());
    assert!(TcpStream::connect(("127.0.0.1", handle.port())).await.is_err());
}

#[tokio::test]
async fn test_fixed_ports_skip_taken() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken_port = taken.local_addr().unwrap().port();
    let wanted = free_port().await;

    let config = OAuthConfig::builder().ports(vec![taken_port, wanted]).build();
    let handle = server::start(config, |_| {}).await.unwrap();
    assert_eq!(handle.port(), wanted);

    handle.shutdown();
}

#[tokio::test]
async fn test_stalled_client_does_not_block_others() {
    let (handle, mut callbacks) = server::start_stream(OAuthConfig::default()).await.unwrap();
    let port = handle.port();

    // Connects and never sends a request
    let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    send(port, &get("/callback?code=1", port)).await;
    let callback = timeout(WAIT, callbacks.next()).await.unwrap().unwrap();
    assert!(callback.payload().ends_with("/callback?code=1"));

    handle.shutdown();
}

#[tokio::test]
async fn test_favicon_and_preflight_are_not_callbacks() {
    let (handle, mut callbacks) = server::start_stream(OAuthConfig::default()).await.unwrap();
    let port = handle.port();

    let favicon = send(port, &get("/favicon.ico", port)).await;
    assert!(favicon.starts_with("HTTP/1.1 404"));
    let preflight = send(port, "OPTIONS /submit HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(preflight.starts_with("HTTP/1.1 204"));

    send(port, &get("/real", port)).await;
    let callback = timeout(WAIT, callbacks.next()).await.unwrap().unwrap();
    assert!(callback.payload().ends_with("/real"));

    handle.shutdown();
}

#[tokio::test]
async fn test_state_verification_end_to_end() {
    let state = OAuthState::generate();
    let (handle, mut callbacks) = server::start_stream(OAuthConfig::default()).await.unwrap();
    let port = handle.port();

    send(port, &get("/cb?code=x&state=forged", port)).await;
    send(port, &get(&format!("/cb?code=y&state={}", state), port)).await;

    let forged = timeout(WAIT, callbacks.next()).await.unwrap().unwrap();
    let genuine = timeout(WAIT, callbacks.next()).await.unwrap().unwrap();
    assert!(!state.verify(forged.payload()));
    assert!(state.verify(genuine.payload()));

    handle.shutdown();
}

// ============================================================================
// Plugin Tests
// ============================================================================

fn plugin_with(grants: &[&str]) -> OAuthPlugin {
    OAuthPlugin::builder()
        .permissions(
            PermissionSet::builder()
                .grants(grants.iter().copied())
                .build()
                .unwrap(),
        )
        .plugin_config(json!("<p>host page</p>"))
        .build()
}

#[tokio::test]
async fn test_plugin_emits_response_event() {
    let plugin = plugin_with(&["oauth:allow-start", "oauth:allow-cancel"]);
    let (sink, mut notified) = RecordingSink::with_notify();

    let port = plugin.start(sink.clone(), None).await.unwrap();
    let response = send(port, &get("/callback?code=42", port)).await;
    assert!(response.ends_with("<p>host page</p>"));

    timeout(WAIT, notified.recv()).await.unwrap().unwrap();
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, RESPONSE_EVENT);
    assert_eq!(
        events[0].1,
        format!("http://127.0.0.1:{}/callback?code=42", port)
    );

    plugin.cancel(port).await.unwrap();
}

#[tokio::test]
async fn test_plugin_explicit_response_beats_host_config() {
    let plugin = plugin_with(&["oauth:allow-start", "oauth:allow-cancel"]);
    let (sink, _notified) = RecordingSink::with_notify();

    let config = OAuthConfig::builder().response("<p>mine</p>").build();
    let port = plugin.start(sink, Some(config)).await.unwrap();
    let response = send(port, &get("/cb", port)).await;
    assert!(response.ends_with("<p>mine</p>"));

    plugin.cancel(port).await.unwrap();
}

#[tokio::test]
async fn test_plugin_denied_start_binds_nothing() {
    let wanted = free_port().await;
    let plugin = plugin_with(&["oauth:deny-start"]);
    let (sink, _notified) = RecordingSink::with_notify();

    let config = OAuthConfig::builder().port(wanted).build();
    let err = plugin.start(sink, Some(config)).await.unwrap_err();
    assert!(matches!(err, OAuthError::PermissionDenied { .. }));

    // The port is still free
    let rebind = TcpListener::bind(("127.0.0.1", wanted)).await;
    assert!(rebind.is_ok());
}

#[tokio::test]
async fn test_plugin_cancels_foreign_server_by_port() {
    let plugin = plugin_with(&["oauth:allow-cancel"]);
    let handle = server::start(OAuthConfig::default(), |_| {}).await.unwrap();

    plugin.cancel(handle.port()).await.unwrap();
    timeout(WAIT, handle.closed()).await.unwrap();
}

#[tokio::test]
async fn test_plugin_invoke_round_trip() {
    let plugin = plugin_with(&["oauth:allow-start", "oauth:allow-cancel"]);
    let (sink, _notified) = RecordingSink::with_notify();

    let port = plugin
        .invoke(sink.clone(), "start", json!({ "config": { "ports": [free_port().await] } }))
        .await
        .unwrap();
    let port = port.as_u64().unwrap() as u16;
    assert_eq!(plugin.running_ports().await, vec![port]);

    plugin
        .invoke(sink, "cancel", json!({ "port": port }))
        .await
        .unwrap();
    assert!(plugin.running_ports().await.is_empty());
}

// ============================================================================
// Table Tests
// ============================================================================

#[test]
fn test_published_table() {
    let table = PermissionRegistry::oauth().to_markdown();
    for row in [
        "| `oauth:allow-cancel` | Enables the cancel command without any pre-configured scope. |",
        "| `oauth:deny-cancel` | Denies the cancel command without any pre-configured scope. |",
        "| `oauth:allow-start` | Enables the start command without any pre-configured scope. |",
        "| `oauth:deny-start` | Denies the start command without any pre-configured scope. |",
    ] {
        assert!(table.contains(row), "missing row: {}", row);
    }
}
