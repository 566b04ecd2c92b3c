mod auth;
mod cli;
mod config;
mod error;
mod output;
mod providers;
mod runner;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting azpipes - Azure DevOps pipeline trigger");
    let succeeded = cli.execute().await?;

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
