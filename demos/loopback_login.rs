//! Loopback login — catch an OAuth redirect on localhost.
//!
//! This example demonstrates the redirect server on its own:
//! - `server::start_stream()` — bind an OS-assigned port and stream callbacks
//! - `OAuthState` — reject redirects that don't carry our `state`
//! - `server::cancel()` — stop the server on Ctrl-C
//!
//! Open the printed URL in a browser (or `curl` it) to simulate the
//! provider's redirect.
//!
//! ## Run
//! ```sh
//! RUST_LOG=oauth_loopback=debug cargo run -p demos --example loopback_login
//! ```

use oauth_loopback::prelude::*;
use oauth_loopback::state::query_param;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth_loopback=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    println!("=== Loopback Login Example ===\n");

    let config = OAuthConfig::builder()
        .response("<html><body>Signed in. You can close this tab.</body></html>")
        .build();

    let (handle, mut callbacks) = server::start_stream(config).await?;
    let port = handle.port();
    let state = OAuthState::generate();

    println!("Redirect server listening on port {}", port);
    println!("Simulate the provider redirect with:\n");
    println!("  http://127.0.0.1:{}/callback?code=demo-code&state={}\n", port, state);
    println!("Press Ctrl-C to cancel.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling...");
                server::cancel(port).await?;
                break;
            }
            next = callbacks.next() => {
                let Some(callback) = next else {
                    println!("Server stopped");
                    break;
                };

                let url = callback.payload();
                if !state.verify(url) {
                    println!("Ignoring redirect with missing or wrong state: {}", url);
                    continue;
                }

                match query_param(url, "code") {
                    Some(code) => println!("Authorization code: {}", code),
                    None => println!("Redirect without a code: {}", url),
                }
                handle.shutdown();
                break;
            }
        }
    }

    handle.closed().await;
    println!("Done");
    Ok(())
}
