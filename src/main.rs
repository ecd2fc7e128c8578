use anyhow::Result;
use clap::Parser;
use tcp_broker::cli::{execute_command, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG 优先，否则使用 --log-level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    // Display version information
    info!("TCP Broker v{}", env!("CARGO_PKG_VERSION"));

    execute_command(&cli).await
}
