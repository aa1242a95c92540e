//! MCP gateway entry point: initializes structured logging, loads
//! configuration, builds the tool registry, and starts the chosen transport.
//!
//! Environment variables:
//! - SERVER_NAME / SERVER_VERSION: override the config file / built-in defaults
//! - MCP_TRANSPORT_MODE: "stdio" or "http" (default: "stdio")
//! - HOST / PORT: bind address for HTTP mode
//! - GATEWAY_CONFIG: path to the YAML config file (default: "gateway.yaml")
//! - RUST_LOG: tracing-subscriber env-filter directive

mod auth;
mod context;
mod core;
mod error;
mod recorder;
mod redact;
mod tools;

use std::env;
use std::path::PathBuf;

use crate::core::hold;
use crate::core::server;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    let config_path = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.yaml".to_string());
    let config = core::config::Config::load(&PathBuf::from(config_path));

    let state = server::build_app_state(&config);
    let _sweeper = hold::spawn_sweeper(state.hold_broker.clone(), 30);

    let transport = env::var("MCP_TRANSPORT_MODE").unwrap_or_else(|_| "stdio".to_string());

    match transport.as_str() {
        "stdio" => server::run_server_stdio(state).await,
        "http" => server::run_server_http(state, config.host.clone(), config.port).await,
        other => {
            eprintln!("Error: Invalid transport mode '{other}'. Must be 'stdio' or 'http'");
            std::process::exit(1);
        }
    }
}
