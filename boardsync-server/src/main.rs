//! `BoardSync` server -- real-time sync for collaborative Kanban boards.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin boardsync-server
//!
//! # Run on custom address with a faster inactivity cycle
//! cargo run --bin boardsync-server -- --bind 127.0.0.1:8080 \
//!     --inactivity-threshold-secs 120 --sweep-interval-secs 15
//! ```

use std::sync::Arc;

use boardsync_server::board::BoardCore;
use boardsync_server::clock::SystemClock;
use boardsync_server::config::{ServerCliArgs, ServerConfig};
use boardsync_server::server::{self, ServerState};
use boardsync_server::store::InMemoryTaskStore;
use boardsync_server::sweeper;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting boardsync server");

    let store = match &config.projects {
        Some(projects) => InMemoryTaskStore::with_projects(projects.iter().cloned()),
        None => InMemoryTaskStore::new(),
    };
    for (user_id, display_name) in &config.users {
        store.register_user(user_id, display_name).await;
    }
    tracing::info!(
        users = config.users.len(),
        restricted_projects = config.projects.is_some(),
        "task store ready"
    );

    let core = Arc::new(BoardCore::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.presence_settings(),
    ));
    let sweep = sweeper::spawn_sweeper(Arc::clone(&core), config.sweep_interval());
    let state = Arc::new(ServerState::with_max_frame_size(core, config.max_frame_size));

    match server::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "board server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "board server task failed");
            }
            sweep.abort();
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start board server");
            std::process::exit(1);
        }
    }
}
