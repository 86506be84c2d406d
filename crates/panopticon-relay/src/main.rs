//! Panopticon relay server.
//!
//! Serves the relay WebSocket and the read-only HTTP views from one listener.

use std::sync::Arc;

use panopticon_relay::config::RelayConfig;
use panopticon_relay::storage::Storage;
use panopticon_relay::{RelayState, api};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    panopticon_relay::init_tracing();

    let config = RelayConfig::from_env();
    let db = Storage::open(&config.db_path)?;
    let state = Arc::new(RelayState::new(Arc::new(db), &config));
    let app = api::router(state);

    let addr = config.bind_addr.as_str();
    tracing::info!("Panopticon relay listening on {addr}");
    tracing::info!("WebSocket:  ws://{addr}/ws");
    tracing::info!("HTTP API:   http://{addr}/api/");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
