use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "agentbox")]
#[command(about = "agentbox job orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server and the worker pool in one process
    Serve(ServeArgs),

    /// Run the API server only
    Api(ServeArgs),

    /// Run the worker pool only
    Worker,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Override the configured bind address
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
