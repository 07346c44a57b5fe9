//! Localhost redirect server
//!
//! This module binds an HTTP listener on `127.0.0.1`, hands every OAuth
//! redirect or submission it receives to a handler, and stops when asked to.
//!
//! # Overview
//!
//! The server handles:
//! - Port selection (fixed list or OS-assigned)
//! - One task per connection, with a read deadline
//! - Sequential delivery of [`OAuthCallback`]s to a `FnMut` handler
//! - Shutdown via [`cancel()`], a request to `/exit`, or [`ServerHandle::shutdown()`]
//!
//! Because the port is an unprotected localhost port, the handler **must**
//! verify what it receives, e.g. with [`OAuthState`](crate::state::OAuthState).
//!
//! # Example
//!
//! ```no_run
//! use oauth_loopback::config::OAuthConfig;
//! use oauth_loopback::server;
//!
//! # async fn example() -> Result<(), oauth_loopback::error::OAuthError> {
//! let handle = server::start(OAuthConfig::default(), |callback| {
//!     println!("Redirected to {}", callback.payload());
//! })
//! .await?;
//!
//! // Point the provider's redirect_uri at this port
//! println!("http://127.0.0.1:{}/callback", handle.port());
//!
//! // Later, from anywhere that knows the port:
//! server::cancel(handle.port()).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, trace, warn};

use crate::config::OAuthConfig;
use crate::error::OAuthError;

mod connection;

use connection::{handle_connection, Outcome};

/// Bytes that stop a running server when sent as the start of a connection
pub const EXIT: [u8; 4] = [1, 3, 3, 7];

const LOCALHOST: [u8; 4] = [127, 0, 0, 1];

/// Deadline for a client to deliver its full request
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept()` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Stream of callbacks returned by [`start_stream`]
pub type CallbackStream = UnboundedReceiverStream<OAuthCallback>;

/// What the server received from the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OAuthCallback {
    /// A `GET` redirect; `url` is the full URL including the query string
    Redirect {
        /// e.g. `http://127.0.0.1:4242/callback?code=...&state=...`
        url: String,
    },
    /// A non-empty `POST /submit` body
    Submission {
        /// Request body, lossily decoded as UTF-8
        body: String,
    },
}

impl OAuthCallback {
    /// The string delivered to the host: the URL or the body
    pub fn payload(&self) -> &str {
        match self {
            OAuthCallback::Redirect { url } => url,
            OAuthCallback::Submission { body } => body,
        }
    }

    /// Owned form of [`payload`](Self::payload)
    pub fn into_payload(self) -> String {
        match self {
            OAuthCallback::Redirect { url } => url,
            OAuthCallback::Submission { body } => body,
        }
    }
}

/// Handle to a running server.
///
/// Dropping the handle does not stop the server; it keeps running until it
/// is cancelled.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    port: u16,
    shutdown: Arc<watch::Sender<bool>>,
    closed: watch::Receiver<bool>,
}

impl ServerHandle {
    /// Port the server is listening on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the accept loop is still running
    pub fn is_running(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Stop the server without a network round-trip. Idempotent.
    pub fn shutdown(&self) {
        debug!(port = self.port, "Shutdown requested");
        self.shutdown.send_replace(true);
    }

    /// Wait until the listener has been dropped.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the accept loop is gone, which is also closed.
        let _ = closed.wait_for(|done| *done).await;
    }
}

/// Start the server and call `handler` for every callback.
///
/// Binds `127.0.0.1` on the first bindable port from `config.ports`, or on an
/// OS-assigned port when `ports` is `None`, and returns once bound. The handler
/// runs on a tokio task, one callback at a time, and should not block.
///
/// # Errors
///
/// - [`OAuthError::InvalidConfig`] if `ports` is an empty list
/// - [`OAuthError::Bind`] if none of the configured ports can be bound
/// - [`OAuthError::Io`] if the listener cannot be created
pub async fn start<F>(config: OAuthConfig, mut handler: F) -> Result<ServerHandle, OAuthError>
where
    F: FnMut(OAuthCallback) + Send + 'static,
{
    let (handle, mut callbacks) = spawn_server(config).await?;

    tokio::spawn(async move {
        while let Some(callback) = callbacks.recv().await {
            trace!("Dispatching callback");
            handler(callback);
        }
        debug!("Callback dispatcher finished");
    });

    Ok(handle)
}

/// Start the server and receive callbacks as a [`Stream`](tokio_stream::Stream).
///
/// The stream ends after the server stops.
///
/// # Errors
///
/// Same as [`start`].
pub async fn start_stream(
    config: OAuthConfig,
) -> Result<(ServerHandle, CallbackStream), OAuthError> {
    let (handle, callbacks) = spawn_server(config).await?;
    Ok((handle, UnboundedReceiverStream::new(callbacks)))
}

/// Stop the server behind `port` without invoking its handler.
///
/// Alternatively, send any request to `http://127.0.0.1:<port>/exit`.
///
/// # Errors
///
/// - [`OAuthError::Cancel`] if no server can be reached on the port
pub async fn cancel(port: u16) -> Result<(), OAuthError> {
    let cancel_err = |source| OAuthError::Cancel { port, source };

    let mut stream = TcpStream::connect(SocketAddr::from((LOCALHOST, port)))
        .await
        .map_err(cancel_err)?;
    stream.write_all(&EXIT).await.map_err(cancel_err)?;
    stream.flush().await.map_err(cancel_err)?;

    debug!(port, "Sent exit marker");
    Ok(())
}

async fn bind(config: &OAuthConfig) -> Result<TcpListener, OAuthError> {
    let Some(ports) = &config.ports else {
        return Ok(TcpListener::bind(SocketAddr::from((LOCALHOST, 0))).await?);
    };

    let mut last_err = None;
    for &port in ports {
        match TcpListener::bind(SocketAddr::from((LOCALHOST, port))).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(port, "Port unavailable: {}", e);
                last_err = Some(e);
            }
        }
    }

    Err(OAuthError::Bind {
        ports: ports.clone(),
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no ports configured")
        }),
    })
}

/// Bind and spawn the accept loop; callbacks arrive on the returned receiver.
async fn spawn_server(
    config: OAuthConfig,
) -> Result<(ServerHandle, mpsc::UnboundedReceiver<OAuthCallback>), OAuthError> {
    config.validate()?;

    let listener = bind(&config).await?;
    let port = listener.local_addr()?.port();
    let response: Arc<str> = Arc::from(config.response_or_default());

    let (callback_tx, callback_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (closed_tx, closed_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    debug!(port, "Redirect server listening");

    tokio::spawn(accept_loop(
        listener,
        port,
        response,
        callback_tx,
        shutdown_rx,
        Arc::clone(&shutdown_tx),
        closed_tx,
    ));

    let handle = ServerHandle {
        port,
        shutdown: shutdown_tx,
        closed: closed_rx,
    };
    Ok((handle, callback_rx))
}

async fn accept_loop(
    listener: TcpListener,
    port: u16,
    response: Arc<str>,
    callbacks: mpsc::UnboundedSender<OAuthCallback>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    closed_tx: watch::Sender<bool>,
) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((mut stream, peer)) => {
                        trace!(port, %peer, "Accepted connection");
                        let response = Arc::clone(&response);
                        let callbacks = callbacks.clone();
                        let shutdown_tx = Arc::clone(&shutdown_tx);

                        tokio::spawn(async move {
                            serve_connection(&mut stream, peer, port, &response, &callbacks, &shutdown_tx)
                                .await;
                        });
                    }
                    Err(e) => accept_failed(port, &e).await,
                }
            }
        }
    }

    drop(listener);
    debug!(port, "Redirect server stopped");
    closed_tx.send_replace(true);
}

/// Log a failed `accept()` and wait before the next one.
///
/// Errors like EMFILE persist until a connection closes.
async fn accept_failed(port: u16, e: &std::io::Error) {
    error!(port, "Error accepting connection: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Handle one accepted connection under [`READ_TIMEOUT`] and act on the outcome
async fn serve_connection<S>(
    stream: &mut S,
    peer: SocketAddr,
    port: u16,
    response: &str,
    callbacks: &mpsc::UnboundedSender<OAuthCallback>,
    shutdown_tx: &watch::Sender<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(READ_TIMEOUT, handle_connection(stream, port, response)).await {
        Ok(Ok(Outcome::Callback(callback))) => {
            if callbacks.send(callback).is_err() {
                debug!(port, "Callback receiver dropped");
            }
        }
        Ok(Ok(Outcome::Exit)) => {
            shutdown_tx.send_replace(true);
        }
        Ok(Ok(Outcome::Ignored)) => {}
        Ok(Err(e)) => {
            error!(port, "Error handling connection: {}", e);
        }
        Err(_) => {
            warn!(port, %peer, "Connection timed out after {:?}", READ_TIMEOUT);
        }
    }
}
