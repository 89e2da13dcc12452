//! Client for the in-scene camera relay.
//!
//! Every command opens its own link through
//! [`resolink_client::SingleShotClient`], sends one text command such as
//! `getCamera()` and returns the relay's JSON reply.

mod camera_client;
mod replies;

pub use camera_client::{
    format_set_camera_command, CameraClient, CameraClientConfig, CameraError, CameraPose,
    DEFAULT_CAMERA_TIMEOUT_MS, DEFAULT_CAMERA_URL, PHOTO_MIN_TIMEOUT_MS,
};
pub use replies::{CameraStatus, CommandAck, PhotoCapture};
