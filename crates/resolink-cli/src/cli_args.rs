use std::path::PathBuf;

use clap::{Parser, Subcommand};
use resolink_client::{DEFAULT_BULK_REQUEST_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};

pub(crate) const DEFAULT_LINK_URL: &str = "ws://localhost:3343";

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "resolink",
    about = "Issue a single call against a scene link endpoint and print the reply",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "RESOLINK_URL",
        default_value = DEFAULT_LINK_URL,
        help = "WebSocket url of the link endpoint"
    )]
    pub(crate) url: String,

    #[arg(
        long = "request-timeout-ms",
        env = "RESOLINK_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Deadline in milliseconds for regular calls"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "bulk-request-timeout-ms",
        env = "RESOLINK_BULK_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_BULK_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Deadline in milliseconds for calls carrying a binary attachment"
    )]
    pub(crate) bulk_request_timeout_ms: u64,

    #[arg(
        long = "traffic-log",
        env = "RESOLINK_TRAFFIC_LOG",
        help = "Append a JSONL record of every send and receive to this file"
    )]
    pub(crate) traffic_log: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: LinkCommand,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub(crate) enum LinkCommand {
    /// Fetch a slot and, optionally, its children and components.
    GetSlot {
        #[arg(long = "slot-id", default_value = resolink_client::requests::ROOT_SLOT_ID)]
        slot_id: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        depth: i64,
        #[arg(long = "include-component-data")]
        include_component_data: bool,
    },
    AddSlot {
        #[arg(long, help = "Slot payload as JSON")]
        data: String,
    },
    UpdateSlot {
        #[arg(long, help = "Slot payload as JSON, including its id")]
        data: String,
    },
    RemoveSlot {
        slot_id: String,
    },
    GetComponent {
        component_id: String,
    },
    AddComponent {
        #[arg(long = "container-slot-id")]
        container_slot_id: String,
        #[arg(long, help = "Component payload as JSON")]
        data: String,
    },
    UpdateComponent {
        #[arg(long, help = "Component payload as JSON, including its id")]
        data: String,
    },
    RemoveComponent {
        component_id: String,
    },
    /// Import an image file located on the scene host.
    ImportTextureFile {
        file_path: String,
    },
    /// Upload raw RGBA pixels (4 bytes per pixel) read from a local file.
    ImportTextureRaw {
        #[arg(long, value_parser = parse_positive_u32)]
        width: u32,
        #[arg(long, value_parser = parse_positive_u32)]
        height: u32,
        #[arg(long = "color-profile")]
        color_profile: Option<String>,
        #[arg(long = "rgba-file")]
        rgba_file: PathBuf,
    },
    /// Send a raw envelope; `messageId` is minted when absent.
    Send {
        #[arg(help = "Envelope JSON with at least a \"$type\" field")]
        envelope: String,
        #[arg(long = "attachment-file")]
        attachment_file: Option<PathBuf>,
        #[arg(long, help = "Use the bulk deadline")]
        bulk: bool,
    },
}
