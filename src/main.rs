//! ==============================================================================
//! main.rs - hazard hub entry point
//! ==============================================================================
//!
//! purpose:
//!     this is the hub that environmental sensor nodes report to. it stores
//!     every frame they send and keeps a hazard verdict (flood, fire, air
//!     quality) for the dashboard.
//!
//! responsibilities:
//!     - load configuration (hub.toml or defaults)
//!     - open or create the csv record store
//!     - accept sensor frames over tcp and append them to the store
//!     - poll the store every couple of seconds and rebuild the published state
//!     - serve that state as json to the dashboard
//!
//! relationships:
//!     - uses: ingest.rs (tcp accept loop), frame.rs (frame parsing)
//!     - uses: store.rs (durable csv log)
//!     - uses: aggregator.rs + state.rs + hazard.rs (derived state)
//!     - uses: web.rs (GET /data)
//!
//! architecture:
//!
//!     sensor nodes
//!          │ tcp :8081, one frame per connection
//!          ▼
//!     ┌─────────────┐  append  ┌──────────────┐  poll 2s  ┌──────────────┐
//!     │ ingest loop │ ───────► │ record store │ ────────► │  aggregator  │
//!     └─────────────┘          │ (csv file)   │           └──────┬───────┘
//!                              └──────────────┘                  │ write lock
//!                                                        ┌───────▼───────┐
//!                                                        │   HubState    │
//!                                                        └───────┬───────┘
//!                                                                │ read lock
//!                                                        ┌───────▼───────┐
//!                                                        │ web server    │ ──► dashboard
//!                                                        │ (port 8000)   │
//!                                                        └───────────────┘
//!
//! ==============================================================================

mod aggregator;
mod config;
mod domain;
mod error;
mod frame;
mod hazard;
mod ingest;
mod state;
mod store;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::aggregator::Aggregator;
use crate::config::HubConfig;
use crate::ingest::IngestServer;
use crate::state::HubState;
use crate::store::RecordStore;

#[derive(Debug, Parser)]
#[command(version, about = "Sensor hub: ingests frames, stores them, publishes hazard status")]
struct Args {
    /// path to hub.toml (default: config/hub.toml, then ../config/hub.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // step 1: load configuration
    // an explicit --config must load; the default search falls back to defaults
    let config = match &args.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::load_or_default(),
    };
    init_tracing(&config.logging.level);
    config.print_summary();

    // step 2: open the record store
    let store_path = config.store.path.clone();
    let store = tokio::task::spawn_blocking(move || RecordStore::open(store_path))
        .await?
        .with_context(|| format!("failed to open record store {}", config.store.path.display()))?;
    let store = Arc::new(store);

    // step 3: initialize shared state
    let state = HubState::shared();

    // step 4: bind the ingestion port before anything runs, so a taken port
    // fails startup instead of a background task
    let show_data = config.logging.show_sensor_data;
    let ingest = IngestServer::bind(&config.ingest, store.clone())
        .await?
        .show_sensor_data(show_data);

    // step 5: start background tasks
    tokio::spawn(ingest.run());

    let aggregator = Aggregator::new(
        store.clone(),
        state.clone(),
        config.aggregator.history_limit.into(),
    )
    .show_sensor_data(show_data);
    tokio::spawn(aggregator.run(config.aggregator.interval()));

    // step 6: serve the dashboard data until ctrl-c
    web::serve(config.http.listen, state).await?;
    tracing::info!("shutting down");
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
