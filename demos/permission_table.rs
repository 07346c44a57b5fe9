//! Permission table — print and check the plugin's published permissions.
//!
//! This example demonstrates:
//! - `PermissionRegistry::oauth()` — the static allow/deny table
//! - `to_markdown()` / `parse_markdown()` — the table's textual form
//! - `PermissionSet` — evaluating a grant list against the table
//!
//! ## Run
//! ```sh
//! cargo run -p demos --example permission_table
//! ```

use oauth_loopback::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth_loopback=warn".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let registry = PermissionRegistry::oauth();
    registry.validate()?;

    println!("=== {} permissions ===\n", PLUGIN_NAME);
    let markdown = registry.to_markdown();
    println!("{}", markdown);

    let parsed = PermissionRegistry::parse_markdown(&markdown)?;
    println!("Parsed back {} entries\n", parsed.len());

    for command in registry.commands() {
        if let Some((allow, deny)) = registry.pair(command) {
            println!("{:<8} allow={:<22} deny={}", command, allow.identifier, deny.identifier);
        }
    }
    println!();

    let grants = PermissionSet::builder()
        .grants(["oauth:allow-start", "oauth:allow-cancel", "oauth:deny-cancel"])
        .build()?;
    for command in Command::ALL {
        println!(
            "{:<8} -> {}",
            command,
            if grants.is_permitted(command.as_str()) { "permitted" } else { "denied" }
        );
    }

    match PermissionSet::builder().grant("oauth:allow-refresh").build() {
        Ok(_) => println!("unexpected: unknown grant accepted"),
        Err(e) => println!("\nRejected grant: {}", e),
    }

    Ok(())
}
