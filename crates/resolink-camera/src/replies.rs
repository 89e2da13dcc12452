use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const URL_PREFIX: &str = "URL:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Reply to `getCamera()`.
pub struct CameraStatus {
    #[serde(rename = "cameraAvailable")]
    pub camera_available: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Reply to `setCamera(...)`.
pub struct CommandAck {
    pub success: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Reply to `takePhoto()`.
pub struct PhotoCapture {
    #[serde(rename = "uploadedImageUrl")]
    pub uploaded_image_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhotoCapture {
    /// The relay sometimes reports the url as `URL:<url>`.
    pub(crate) fn strip_url_prefix(mut self) -> Self {
        if let Some(url) = self.uploaded_image_url.strip_prefix(URL_PREFIX) {
            self.uploaded_image_url = url.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CameraStatus, PhotoCapture};

    #[test]
    fn unit_extra_reply_fields_survive_round_trip() {
        let status: CameraStatus =
            serde_json::from_value(json!({"cameraAvailable": true, "fov": 60}))
                .expect("status");
        assert!(status.camera_available);
        assert_eq!(status.extra.get("fov"), Some(&json!(60)));
        assert_eq!(
            serde_json::to_value(&status).expect("encode"),
            json!({"cameraAvailable": true, "fov": 60})
        );
    }

    #[test]
    fn unit_photo_url_prefix_is_stripped_once() {
        let capture: PhotoCapture = serde_json::from_value(
            json!({"uploadedImageUrl": "URL:https://img.example/p.png"}),
        )
        .expect("capture");
        assert_eq!(
            capture.strip_url_prefix().uploaded_image_url,
            "https://img.example/p.png"
        );
    }
}
