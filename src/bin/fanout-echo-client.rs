//! Console client: sends typed lines to a fanout-echo server and prints
//! everything the server broadcasts. An empty line exits.

use clap::Parser;
use fanout_echo::client;
use fanout_echo::config::ClientArgs;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    // Diagnostics go to stderr so they never interleave with received data.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(client::run(args));
    // A console read may still be parked on a blocking thread.
    runtime.shutdown_background();
    result
}
