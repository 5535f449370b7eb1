//! Roddle · Daily Riddle Backend
//!
//! - Axum HTTP API for daily riddles and guesses
//! - Riddle generation through a fallback chain: remote model, local model, static mock
//! - One riddle per (user, day, difficulty), shared by concurrent requests
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   OPENAI_API_KEY        : enables the remote backend if present
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_MODEL          : default "gpt-4o-mini"
//!   OLLAMA_URL            : default "http://127.0.0.1:11434"
//!   OLLAMA_MODEL          : default "neural-chat"
//!   LOCAL_MODEL_DISABLED  : "1"/"true" drops the local backend
//!   GAME_UTC_OFFSET_HOURS : timezone of the game day (default -8)
//!   RIDDLE_CONFIG_PATH    : path to TOML config (prompts, generation tuning, extra mock riddles)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod parser;
mod backends;
mod ledger;
mod orchestrator;
mod game;
mod clock;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Backends, ledger, orchestrator and game service.
  let state = Arc::new(AppState::new()?);
  state.log_backend_availability().await;
  state.spawn_warm_up();

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "roddle_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  state.shutdown_backends().await;
  info!(target: "roddle_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!(target: "roddle_backend", "Ctrl-C received; shutting down"),
    Err(e) => warn!(target: "roddle_backend", error = %e, "Could not listen for Ctrl-C; shutting down"),
  }
}
