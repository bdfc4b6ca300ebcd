//! modcache CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use modcache_cli::commands::{dispatch, Cli, StrictFailure};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        let code = if e.is::<StrictFailure>() { 2 } else { 1 };
        std::process::exit(code);
    }
}
