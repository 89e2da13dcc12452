mod cli_args;
mod commands;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use resolink_client::{Dispatcher, DispatcherConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::Cli;
use crate::commands::{build_link_request, ensure_success, render_reply, run_link_request};

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn dispatcher_config(cli: &Cli) -> DispatcherConfig {
    let mut config = DispatcherConfig::new(cli.url.clone())
        .with_request_timeout(Duration::from_millis(cli.request_timeout_ms))
        .with_bulk_request_timeout(Duration::from_millis(cli.bulk_request_timeout_ms));
    if let Some(path) = cli.traffic_log.as_ref() {
        config = config.with_traffic_log(path);
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let request = build_link_request(&cli.command).await?;
    let dispatcher = Dispatcher::websocket(dispatcher_config(&cli))?;
    let reply = run_link_request(&dispatcher, request).await?;
    println!("{}", render_reply(&reply)?);
    ensure_success(&reply)
}
