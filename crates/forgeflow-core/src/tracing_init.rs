//! Shared tracing/logging initialization.
//!
//! The daemon binary and integration harnesses use the same pattern for
//! setting up `tracing_subscriber` with an env-filter and optional JSON
//! output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber for Forgeflow processes.
///
/// * `level` -- default level for the forgeflow crates when `RUST_LOG` is
///   not set (e.g. `"info"`, `"debug"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(level: &str, log_json: bool) {
    let default_filter = format!("forgeflow_daemon={level},forgeflow_core={level}");
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or(default_filter),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
