//! fanout-echo: TCP echo server that broadcasts to every connected client.
//!
//! Features:
//! - Single-threaded readiness loop (epoll/kqueue through mio)
//! - Best-effort non-blocking fan-out
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

use fanout_echo::config::Config;
use fanout_echo::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        buffer_size = config.buffer_size,
        "Starting fanout-echo server"
    );

    runtime::run(config)?;
    info!("Server stopped");
    Ok(())
}
