use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use resolink_client::{
    requests::{self, LinkRequest},
    CallOptions, Dispatcher, InboundEnvelope, OutboundEnvelope,
};
use serde_json::Value;
use tracing::info;

use crate::cli_args::LinkCommand;

const RGBA_BYTES_PER_PIXEL: u64 = 4;

pub(crate) async fn build_link_request(command: &LinkCommand) -> Result<LinkRequest> {
    let request = match command {
        LinkCommand::GetSlot {
            slot_id,
            depth,
            include_component_data,
        } => requests::get_slot(slot_id, *depth, *include_component_data),
        LinkCommand::AddSlot { data } => requests::add_slot(parse_json_payload(data)?),
        LinkCommand::UpdateSlot { data } => requests::update_slot(parse_json_payload(data)?),
        LinkCommand::RemoveSlot { slot_id } => requests::remove_slot(slot_id),
        LinkCommand::GetComponent { component_id } => requests::get_component(component_id),
        LinkCommand::AddComponent {
            container_slot_id,
            data,
        } => requests::add_component(container_slot_id, parse_json_payload(data)?),
        LinkCommand::UpdateComponent { data } => {
            requests::update_component(parse_json_payload(data)?)
        }
        LinkCommand::RemoveComponent { component_id } => {
            requests::remove_component(component_id)
        }
        LinkCommand::ImportTextureFile { file_path } => requests::import_texture_2d_file(file_path),
        LinkCommand::ImportTextureRaw {
            width,
            height,
            color_profile,
            rgba_file,
        } => {
            let rgba = read_file(rgba_file).await?;
            let expected = u64::from(*width) * u64::from(*height) * RGBA_BYTES_PER_PIXEL;
            if rgba.len() as u64 != expected {
                bail!(
                    "{} holds {} bytes but a {}x{} RGBA texture needs {}",
                    rgba_file.display(),
                    rgba.len(),
                    width,
                    height,
                    expected
                );
            }
            requests::import_texture_2d_raw_data(*width, *height, color_profile.as_deref(), rgba)
        }
        LinkCommand::Send {
            envelope,
            attachment_file,
            bulk,
        } => {
            let envelope = serde_json::from_str::<OutboundEnvelope>(envelope)
                .context("envelope must be a JSON object with a \"$type\" field")?;
            let attachment = match attachment_file {
                Some(path) => Some(read_file(path).await?),
                None => None,
            };
            LinkRequest {
                envelope,
                attachment,
                options: CallOptions {
                    timeout: None,
                    bulk: *bulk,
                },
            }
        }
    };
    Ok(request)
}

/// Connects, issues `request`, and disconnects whatever the outcome.
pub(crate) async fn run_link_request(
    dispatcher: &Dispatcher,
    request: LinkRequest,
) -> Result<InboundEnvelope> {
    dispatcher
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", dispatcher.config().url))?;
    let operation = request.operation().to_string();
    info!(operation, "issuing link call");
    let outcome = request.send(dispatcher).await;
    dispatcher.disconnect().await;
    outcome.with_context(|| format!("{operation} failed"))
}

pub(crate) fn render_reply(reply: &InboundEnvelope) -> Result<String> {
    serde_json::to_string_pretty(reply).context("failed to render reply")
}

/// Turns a `success: false` reply into an error for the exit code.
pub(crate) fn ensure_success(reply: &InboundEnvelope) -> Result<()> {
    if reply.success {
        return Ok(());
    }
    Err(anyhow!(
        "link reported failure: {}",
        reply.error_info.as_deref().unwrap_or("no error info")
    ))
}

fn parse_json_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--data must be valid JSON")
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}
