mod actions;
mod api;
mod cli;
mod config;
mod error;
mod events;
mod forms;
mod guard;
mod output;
mod session;
mod stats;
mod sync;
mod views;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting pipewatch");
    cli.execute().await?;

    Ok(())
}
