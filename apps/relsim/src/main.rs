//! # relsim
//!
//! The main binary for the relsim graph evolution engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               apps/relsim (THE BINARY)               │
//! │                                                      │
//! │   ┌──────────────┐        ┌───────────────────────┐  │
//! │   │     CLI      │        │  files: topology JSON │  │
//! │   │    (clap)    │───────▶│  config TOML          │  │
//! │   └──────┬───────┘        │  checkpoint blobs     │  │
//! │          │                └───────────────────────┘  │
//! │          ▼                                           │
//! │   ┌───────────────┐                                  │
//! │   │  relsim-core  │                                  │
//! │   │  (THE LOGIC)  │                                  │
//! │   └───────────────┘                                  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! relsim generate -s ring -n 64 -o ring.json
//! relsim run -t ring.json --steps 500 --dt 0.01 --save state.ckpt
//! relsim inspect -i state.ckpt
//! ```

use clap::Parser;
use relsim::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // RELSIM_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("RELSIM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "relsim=debug,relsim_core=debug"
    } else {
        "relsim=info,relsim_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  relsim v{}

  Sparse • Unitary • Rewirable
"#,
        env!("CARGO_PKG_VERSION")
    );
}
