//! # netrel
//!
//! Command-line front end for a netrel database.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              apps/netrel (THE BINARY)         │
//! │                                               │
//! │   database.toml ──► Config ──► Environment    │
//! │                                    │          │
//! │   ┌─────────────┐                  ▼          │
//! │   │  CLI (clap) │ ───────►  ┌─────────────┐   │
//! │   └─────────────┘           │ netrel-core │   │
//! │                             └─────────────┘   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Apply the schema and load fixtures for the development environment
//! netrel setup
//!
//! # Link person 2 under person 1 in the `family` network
//! netrel link family 1 2
//!
//! # Ancestors of person 3, as JSON
//! netrel --json query family ancestors 3
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // NETREL_LOG_FORMAT=json switches the stderr log to one JSON object per line.
    let log_format = std::env::var("NETREL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "netrel=info,netrel_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
