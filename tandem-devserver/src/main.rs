//! `tandem-devserver`: in-memory backend for local development.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default address 127.0.0.1:8080 with one conversation
//! cargo run --bin tandem-devserver -- --seed c-1:ana:ben
//!
//! # Or via environment variable
//! TANDEM_DEV_ADDR=0.0.0.0:9000 cargo run --bin tandem-devserver
//! ```

use std::sync::Arc;

use clap::Parser;
use tandem_devserver::config::{DevCliArgs, DevConfig};
use tandem_devserver::{DevState, start_server_with_state};

#[tokio::main]
async fn main() {
    let cli = DevCliArgs::parse();

    let config = match DevConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = Arc::new(DevState::new());
    for conversation in config.conversations {
        state.insert_conversation(conversation).await;
    }

    match start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "dev server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dev server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start dev server");
            std::process::exit(1);
        }
    }
}
