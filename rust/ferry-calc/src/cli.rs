//! Shared plumbing for the binaries.

use std::time::Duration;

use ferry_session::env_parse;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Log to stderr, filtered by `RUST_LOG` (default `info,ferry=debug`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ferry=debug"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Where clients connect: `FERRY_SERVER_ADDR`, default `127.0.0.1:50051`.
pub fn server_addr() -> String {
    env_parse("FERRY_SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:50051".to_string())
}

/// Pause between paced client sends: `FERRY_PACE_MS`, else `default`.
pub fn pace(default: Duration) -> Duration {
    env_parse("FERRY_PACE_MS")
        .map(Duration::from_millis)
        .unwrap_or(default)
}
