//! Kotoba · Japanese practice backend
//!
//! - Axum JSON API for vocabulary lists, AI-generated practice problems and
//!   scenario vocabulary lists
//! - OpenAI chat completions with a per-task fallback model
//! - In-memory or Supabase (PostgREST) persistence
//!
//! Important env variables:
//!   PORT                       : u16 (default 3000)
//!   OPENAI_API_KEY             : enables OpenAI integration if present
//!   OPENAI_BASE_URL            : default "https://api.openai.com/v1"
//!   OPENAI_TIMEOUT_SECS        : per-call deadline (default 90)
//!   OPENAI_DEBUG_RAW_RESPONSE  : "true" embeds truncated raw payloads in errors
//!   APP_CONFIG_PATH            : TOML config (model policy, prompts, dev tokens)
//!   STORE_BACKEND              : "memory" (default) or "supabase"
//!   SUPABASE_URL / SUPABASE_ANON_KEY / SUPABASE_SERVICE_ROLE_KEY
//!   LOG_LEVEL                  : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT                 : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod models;
mod schema;
mod openai;
mod normalize;
mod scenario;
mod generator;
mod store;
mod auth;
mod vocab;
mod practice;
mod state;
mod protocol;
mod error;
mod routes;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{load_app_config_from_env, Settings};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();
  let config = load_app_config_from_env().unwrap_or_default();

  // Shared application state (store, OpenAI client, model policy, prompts, auth).
  let state = Arc::new(AppState::build(&settings, config)?);

  // HTTP router with routes, CORS and tracing layers.
  let app = build_router(state);

  let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "kotoba_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "kotoba_backend", error = %e, "Failed to listen for shutdown signal");
    return;
  }
  info!(target: "kotoba_backend", "Shutdown signal received");
}
