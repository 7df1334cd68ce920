//! # Memex
//!
//! The command-line binary for the Memex path-addressed data engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              apps/memex (THE BINARY)          │
//! │                                               │
//! │   ┌─────────────┐        ┌────────────────┐   │
//! │   │    CLI      │        │ memex.toml /   │   │
//! │   │   (clap)    │◄───────│ MEMEX_DB       │   │
//! │   └──────┬──────┘        └────────────────┘   │
//! │          ▼                                    │
//! │   ┌───────────────┐    ┌──────────────────┐   │
//! │   │  memex-core   │───►│ redb / snapshot  │   │
//! │   │  (THE LOGIC)  │    │      file        │   │
//! │   └───────────────┘    └──────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! memex init
//! memex write fleet.trucks.1.fuel 10
//! memex derive fleet.trucks.1.double "fuel * 2"
//! memex secret wallet s3cret
//! memex read 'fleet.trucks[fuel > 5]'
//! memex export -o backup.memx -t binary
//! ```

use clap::Parser;
use memex::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // MEMEX_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("MEMEX_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "memex=debug,memex_core=debug"
    } else {
        "memex=info,memex_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

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

    if !cli.quiet && !cli.json_mode && cli.command.is_none() {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Memex banner.
fn print_banner() {
    println!(
        r#"
  ███╗   ███╗███████╗███╗   ███╗███████╗██╗  ██╗
  ████╗ ████║██╔════╝████╗ ████║██╔════╝╚██╗██╔╝
  ██╔████╔██║█████╗  ██╔████╔██║█████╗   ╚███╔╝
  ██║╚██╔╝██║██╔══╝  ██║╚██╔╝██║██╔══╝   ██╔██╗
  ██║ ╚═╝ ██║███████╗██║ ╚═╝ ██║███████╗██╔╝ ██╗
  ╚═╝     ╚═╝╚══════╝╚═╝     ╚═╝╚══════╝╚═╝  ╚═╝

  Path-addressed data engine v{}

  Append-only • Stealth scopes • Live derivations
"#,
        env!("CARGO_PKG_VERSION")
    );
}
