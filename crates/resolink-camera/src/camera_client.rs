use std::{sync::Arc, time::Duration};

use resolink_client::{DispatchError, SingleShotClient, Transport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{CameraStatus, CommandAck, PhotoCapture};

/// Public relay the camera bridge talks to by default.
pub const DEFAULT_CAMERA_URL: &str = "wss://wsecho.kokoa.dev/mcp/cam";
/// Per-command deadline unless configured otherwise.
pub const DEFAULT_CAMERA_TIMEOUT_MS: u64 = 10_000;
/// Lower bound for `takePhoto()`, which uploads the image before replying.
pub const PHOTO_MIN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Relay url and per-command deadline.
pub struct CameraClientConfig {
    pub url: String,
    pub timeout: Duration,
}

impl Default for CameraClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAMERA_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_CAMERA_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Camera position in world units and rotation in degrees.
pub struct CameraPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub xrot: f64,
    pub yrot: f64,
    pub zrot: f64,
}

#[derive(Debug, Error)]
/// Failure of one camera command. Relay replies are kept verbatim.
pub enum CameraError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("relay rejected {command}: {reply}")]
    Rejected { command: String, reply: Value },
    #[error("unexpected reply to {command}: {detail}; reply was {reply}")]
    UnexpectedReply {
        command: String,
        detail: String,
        reply: Value,
    },
}

impl CameraError {
    /// The relay's reply, when one arrived.
    pub fn relay_reply(&self) -> Option<&Value> {
        match self {
            Self::Dispatch(_) => None,
            Self::Rejected { reply, .. } | Self::UnexpectedReply { reply, .. } => Some(reply),
        }
    }
}

#[derive(Debug, Clone)]
/// Issues camera commands, one fresh link per command.
pub struct CameraClient {
    link: SingleShotClient,
    timeout: Duration,
}

impl CameraClient {
    /// Client over the WebSocket transport.
    pub fn new(config: CameraClientConfig) -> Self {
        Self {
            link: SingleShotClient::websocket(config.url),
            timeout: config.timeout,
        }
    }

    /// Client over an arbitrary transport, used by tests and embedders.
    pub fn with_transport(config: CameraClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            link: SingleShotClient::new(config.url, transport),
            timeout: config.timeout,
        }
    }

    pub fn url(&self) -> &str {
        self.link.url()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Asks whether a camera is present in the scene.
    pub async fn get_camera(&self) -> Result<CameraStatus, CameraError> {
        self.command("getCamera()", self.timeout).await
    }

    /// Moves the camera to `pose`.
    pub async fn set_camera(&self, pose: CameraPose) -> Result<CommandAck, CameraError> {
        let command = format_set_camera_command(&pose);
        self.command(&command, self.timeout).await
    }

    /// Captures a photo and returns its uploaded url.
    pub async fn take_photo(&self) -> Result<PhotoCapture, CameraError> {
        let timeout = self
            .timeout
            .max(Duration::from_millis(PHOTO_MIN_TIMEOUT_MS));
        let capture: PhotoCapture = self.command("takePhoto()", timeout).await?;
        let capture = capture.strip_url_prefix();
        info!(url = %capture.uploaded_image_url, "photo uploaded");
        Ok(capture)
    }

    async fn command<T: DeserializeOwned>(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<T, CameraError> {
        debug!(command, timeout_ms = timeout.as_millis() as u64, "sending camera command");
        let reply: Value = self.link.request(command, timeout).await?;
        match T::deserialize(&reply) {
            Ok(decoded) => Ok(decoded),
            Err(_) if is_relay_failure(&reply) => {
                warn!(command, %reply, "relay rejected camera command");
                Err(CameraError::Rejected {
                    command: command.to_string(),
                    reply,
                })
            }
            Err(error) => Err(CameraError::UnexpectedReply {
                command: command.to_string(),
                detail: error.to_string(),
                reply,
            }),
        }
    }
}

/// `{"error": ...}` or `{"success": false, ...}`.
fn is_relay_failure(reply: &Value) -> bool {
    reply.get("error").is_some_and(|error| !error.is_null())
        || reply.get("success").and_then(Value::as_bool) == Some(false)
}

/// Renders `setCamera(x, y, z, xrot, yrot, zrot)` with numbers in their
/// shortest round-trip form (`1`, `1.5`, `-90`).
pub fn format_set_camera_command(pose: &CameraPose) -> String {
    let args = [pose.x, pose.y, pose.z, pose.xrot, pose.yrot, pose.zrot]
        .map(format_number)
        .join(", ");
    format!("setCamera({args})")
}

fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Avoids "-0".
        return "0".to_string();
    }
    value.to_string()
}
