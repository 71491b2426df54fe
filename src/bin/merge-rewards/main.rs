//! merge-rewards CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use merge_rewards::NodeBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("merge-rewards v{}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = cli.init_config.clone() {
        let config = cli.into_config()?;
        config.to_file(&path)?;
        info!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    // Build configuration
    let config = cli.into_config()?;

    // Build and run the service
    let mut node = NodeBuilder::new(config).build().await?;
    info!("Listening on http://{}", node.local_addr());

    // Run until shutdown
    node.run().await?;

    info!("Goodbye!");
    Ok(())
}
