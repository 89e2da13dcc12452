use anyhow::{anyhow, bail, Result};
use resolink_camera::{CameraClient, CameraPose};
use serde_json::{json, Map, Value};
use tracing::warn;

pub(crate) const TOOL_GET_CAMERA: &str = "get_camera";
pub(crate) const TOOL_SET_CAMERA: &str = "set_camera";
pub(crate) const TOOL_TAKE_PHOTO: &str = "take_photo";
const POSE_FIELDS: [(&str, &str); 6] = [
    ("x", "X position"),
    ("y", "Y position"),
    ("z", "Z position"),
    ("xrot", "X rotation in degrees"),
    ("yrot", "Y rotation in degrees"),
    ("zrot", "Z rotation in degrees"),
];

#[derive(Debug, Clone)]
pub(crate) struct CameraToolDescriptor {
    pub(crate) name: &'static str,
    pub(crate) title: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: Value,
}

/// Outcome of one tool call: the text shown to the host and whether it failed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CameraToolOutput {
    pub(crate) text: String,
    pub(crate) structured: Option<Value>,
    pub(crate) is_error: bool,
}

impl CameraToolOutput {
    fn success(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize tool result\"}".to_string());
        Self {
            text,
            structured: Some(value),
            is_error: false,
        }
    }

    fn failure(message: impl std::fmt::Display, relay_reply: Option<Value>) -> Self {
        Self {
            text: format!("Error: {message}"),
            structured: relay_reply,
            is_error: true,
        }
    }
}

pub(crate) fn camera_tool_descriptors() -> Vec<CameraToolDescriptor> {
    let pose_properties = POSE_FIELDS
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                json!({"type": "number", "description": description}),
            )
        })
        .collect::<Map<String, Value>>();
    let pose_required = POSE_FIELDS
        .iter()
        .map(|(name, _)| Value::String(name.to_string()))
        .collect::<Vec<_>>();

    vec![
        CameraToolDescriptor {
            name: TOOL_GET_CAMERA,
            title: "Get Camera Status",
            description: "Check if the camera is available in the scene",
            input_schema: empty_object_schema(),
        },
        CameraToolDescriptor {
            name: TOOL_SET_CAMERA,
            title: "Set Camera Position",
            description: "Set the camera position and rotation in the scene",
            input_schema: json!({
                "type": "object",
                "properties": pose_properties,
                "required": pose_required,
            }),
        },
        CameraToolDescriptor {
            name: TOOL_TAKE_PHOTO,
            title: "Take Photo",
            description: "Take a photo in the scene and return the uploaded image URL. This may take several seconds.",
            input_schema: empty_object_schema(),
        },
    ]
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Runs one tool. Argument errors are returned as `Err`; camera failures are
/// folded into an error output.
pub(crate) async fn execute_camera_tool(
    client: &CameraClient,
    tool_name: &str,
    arguments: &Map<String, Value>,
) -> Result<CameraToolOutput> {
    let outcome = match tool_name {
        TOOL_GET_CAMERA => client.get_camera().await.map(serde_json::to_value),
        TOOL_SET_CAMERA => {
            let pose = parse_camera_pose(arguments)?;
            client.set_camera(pose).await.map(serde_json::to_value)
        }
        TOOL_TAKE_PHOTO => client.take_photo().await.map(serde_json::to_value),
        other => bail!("unknown tool '{other}'"),
    };
    Ok(match outcome {
        Ok(Ok(value)) => CameraToolOutput::success(value),
        Ok(Err(error)) => CameraToolOutput::failure(error, None),
        Err(error) => {
            warn!(tool = tool_name, %error, "camera tool failed");
            let relay_reply = error.relay_reply().cloned();
            CameraToolOutput::failure(error, relay_reply)
        }
    })
}

fn parse_camera_pose(arguments: &Map<String, Value>) -> Result<CameraPose> {
    let mut values = [0.0_f64; 6];
    for ((name, _), slot) in POSE_FIELDS.iter().zip(values.iter_mut()) {
        *slot = arguments
            .get(*name)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("{TOOL_SET_CAMERA} requires numeric argument '{name}'"))?;
    }
    let [x, y, z, xrot, yrot, zrot] = values;
    Ok(CameraPose {
        x,
        y,
        z,
        xrot,
        yrot,
        zrot,
    })
}
