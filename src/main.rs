mod cli;

use agentbox::api;
use agentbox::config::Config;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve(args) => {
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            api::run(config, true).await?;
        }
        Commands::Api(args) => {
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            api::run(config, false).await?;
        }
        Commands::Worker => api::run_worker(config).await?,
    }

    Ok(())
}
