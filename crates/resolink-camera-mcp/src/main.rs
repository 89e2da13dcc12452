mod camera_tools;
mod mcp_server;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use resolink_camera::{CameraClient, CameraClientConfig, DEFAULT_CAMERA_TIMEOUT_MS, DEFAULT_CAMERA_URL};
use tokio::io::BufReader;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::mcp_server::{serve_mcp_jsonrpc_lines, McpServerState};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "resolink-camera-mcp",
    about = "MCP stdio server exposing the in-scene camera relay as tools",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "CAMERA_WS_URL",
        default_value = DEFAULT_CAMERA_URL,
        help = "WebSocket url of the camera relay"
    )]
    url: String,

    #[arg(
        long = "timeout-ms",
        env = "CAMERA_TIMEOUT_MS",
        default_value_t = DEFAULT_CAMERA_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Per-command timeout in milliseconds (take_photo waits at least 30000)"
    )]
    timeout_ms: u64,
}

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let client = CameraClient::new(CameraClientConfig {
        url: cli.url,
        timeout: Duration::from_millis(cli.timeout_ms),
    });
    info!(url = client.url(), "camera MCP server started");
    let state = McpServerState::new(client);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let report = serve_mcp_jsonrpc_lines(stdin, &mut stdout, &state).await?;
    info!(
        processed_frames = report.processed_frames,
        error_count = report.error_count,
        "stdin closed; camera MCP server stopped"
    );
    Ok(())
}
