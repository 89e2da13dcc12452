//! Builders for the link protocol operations.
//!
//! Each builder mints a fresh correlation id. Scene payloads (`data`) are
//! passed through as untyped JSON.

use serde_json::Value;

use crate::{CallOptions, DispatchError, Dispatcher, InboundEnvelope, OutboundEnvelope};

/// Id of the scene root slot.
pub const ROOT_SLOT_ID: &str = "Root";
/// Colour profile of raw texture imports unless one is given.
pub const DEFAULT_COLOR_PROFILE: &str = "sRGB";

/// An envelope ready to be dispatched, with its attachment and call options.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRequest {
    pub envelope: OutboundEnvelope,
    pub attachment: Option<Vec<u8>>,
    pub options: CallOptions,
}

impl LinkRequest {
    /// Request with the standard deadline and no attachment.
    pub fn new(envelope: OutboundEnvelope) -> Self {
        Self {
            envelope,
            attachment: None,
            options: CallOptions::default(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.envelope.operation
    }

    /// Issues the request on `dispatcher`.
    pub async fn send(self, dispatcher: &Dispatcher) -> Result<InboundEnvelope, DispatchError> {
        dispatcher
            .call_with(self.envelope, self.attachment, self.options)
            .await
    }
}

impl From<OutboundEnvelope> for LinkRequest {
    fn from(envelope: OutboundEnvelope) -> Self {
        Self::new(envelope)
    }
}

/// `getSlot`: a slot and `depth` levels of children (`-1` for all).
pub fn get_slot(slot_id: &str, depth: i64, include_component_data: bool) -> LinkRequest {
    OutboundEnvelope::new("getSlot")
        .with_field("slotId", slot_id)
        .with_field("depth", depth)
        .with_field("includeComponentData", include_component_data)
        .into()
}

/// `addSlot` with untyped slot `data`.
pub fn add_slot(data: Value) -> LinkRequest {
    OutboundEnvelope::new("addSlot").with_field("data", data).into()
}

pub fn update_slot(data: Value) -> LinkRequest {
    OutboundEnvelope::new("updateSlot")
        .with_field("data", data)
        .into()
}

/// `removeSlot`.
pub fn remove_slot(slot_id: &str) -> LinkRequest {
    OutboundEnvelope::new("removeSlot")
        .with_field("slotId", slot_id)
        .into()
}

/// `getComponent`.
pub fn get_component(component_id: &str) -> LinkRequest {
    OutboundEnvelope::new("getComponent")
        .with_field("componentId", component_id)
        .into()
}

/// `addComponent` under `container_slot_id`.
pub fn add_component(container_slot_id: &str, data: Value) -> LinkRequest {
    OutboundEnvelope::new("addComponent")
        .with_field("containerSlotId", container_slot_id)
        .with_field("data", data)
        .into()
}

pub fn update_component(data: Value) -> LinkRequest {
    OutboundEnvelope::new("updateComponent")
        .with_field("data", data)
        .into()
}

pub fn remove_component(component_id: &str) -> LinkRequest {
    OutboundEnvelope::new("removeComponent")
        .with_field("componentId", component_id)
        .into()
}

/// Imports an image file that lives on the host running the scene.
pub fn import_texture_2d_file(file_path: &str) -> LinkRequest {
    OutboundEnvelope::new("importTexture2DFile")
        .with_field("filePath", file_path)
        .into()
}

/// Uploads RGBA pixels (4 bytes per pixel) as the binary attachment.
///
/// Sent as a bulk call so it gets the longer deadline.
pub fn import_texture_2d_raw_data(
    width: u32,
    height: u32,
    color_profile: Option<&str>,
    rgba: Vec<u8>,
) -> LinkRequest {
    let envelope = OutboundEnvelope::new("importTexture2DRawData")
        .with_field("width", width)
        .with_field("height", height)
        .with_field(
            "colorProfile",
            color_profile.unwrap_or(DEFAULT_COLOR_PROFILE),
        );
    LinkRequest {
        envelope,
        attachment: Some(rgba),
        options: CallOptions::bulk(),
    }
}
