use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

const RESERVED_OUTBOUND_KEYS: &[&str] = &["$type", "messageId"];

/// Token linking one outbound call to its inbound reply.
///
/// Minted as a random UUID for every call unless the caller supplies one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random identifier.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a caller-supplied identifier, returning `None` if it is blank.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request sent to the link endpoint.
///
/// Serializes as `{"$type": <operation>, "messageId": <id>, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "$type")]
    pub operation: String,
    #[serde(rename = "messageId", default = "CorrelationId::mint")]
    pub message_id: CorrelationId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutboundEnvelope {
    /// Starts an envelope for `operation` with a freshly minted id.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message_id: CorrelationId::mint(),
            fields: Map::new(),
        }
    }

    /// Replaces the minted id with a caller-supplied one.
    pub fn with_message_id(mut self, message_id: CorrelationId) -> Self {
        self.message_id = message_id;
        self
    }

    /// Adds an operation-specific field. `$type` and `messageId` are owned by
    /// the envelope itself and are ignored here.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if !RESERVED_OUTBOUND_KEYS.contains(&name.as_str()) {
            self.fields.insert(name, value.into());
        }
        self
    }

    /// Wire form of the envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reply received from the link endpoint.
///
/// `success: false` is a business-level outcome, not a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "$type", default)]
    pub kind: String,
    #[serde(rename = "sourceMessageId")]
    pub source_message_id: CorrelationId,
    pub success: bool,
    #[serde(rename = "errorInfo", default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InboundEnvelope {
    /// Operation-specific reply field, such as `data`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Parses one inbound text frame into an [`InboundEnvelope`].
pub fn parse_inbound_envelope(text: &str) -> Result<InboundEnvelope, serde_json::Error> {
    serde_json::from_str::<InboundEnvelope>(text)
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the frame as text; binary frames must be valid UTF-8.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(bytes) => String::from_utf8(bytes).ok(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_inbound_envelope, CorrelationId, Frame, OutboundEnvelope};

    #[test]
    fn unit_outbound_envelope_serializes_wire_shape() {
        let envelope = OutboundEnvelope::new("getSlot")
            .with_message_id(CorrelationId::new("abc-123").expect("id"))
            .with_field("slotId", "Root")
            .with_field("depth", 0);
        let value: serde_json::Value =
            serde_json::from_str(&envelope.to_json().expect("encode")).expect("json");
        assert_eq!(
            value,
            json!({"$type": "getSlot", "messageId": "abc-123", "slotId": "Root", "depth": 0})
        );
    }

    #[test]
    fn regression_outbound_envelope_ignores_reserved_field_names() {
        let envelope = OutboundEnvelope::new("removeSlot")
            .with_field("$type", "other")
            .with_field("messageId", "spoofed");
        assert!(envelope.fields.is_empty());
        assert_eq!(envelope.operation, "removeSlot");
        assert_ne!(envelope.message_id.as_str(), "spoofed");
    }

    #[test]
    fn unit_outbound_envelope_without_message_id_mints_one() {
        let envelope: OutboundEnvelope =
            serde_json::from_value(json!({"$type": "removeSlot", "slotId": "S1"})).expect("parse");
        assert!(!envelope.message_id.as_str().is_empty());
        assert_eq!(envelope.fields.get("slotId"), Some(&json!("S1")));
    }

    #[test]
    fn unit_parse_inbound_envelope_keeps_result_fields() {
        let envelope = parse_inbound_envelope(
            r#"{"$type":"slotData","sourceMessageId":"m1","success":false,"errorInfo":"missing","depth":1}"#,
        )
        .expect("parse");
        assert_eq!(envelope.kind, "slotData");
        assert_eq!(envelope.source_message_id.as_str(), "m1");
        assert!(!envelope.success);
        assert_eq!(envelope.error_info.as_deref(), Some("missing"));
        assert_eq!(envelope.field("depth"), Some(&json!(1)));
        assert!(envelope.field("errorInfo").is_none());
    }

    #[test]
    fn regression_parse_inbound_envelope_rejects_frames_without_source_id() {
        assert!(parse_inbound_envelope(r#"{"$type":"response","success":true}"#).is_err());
        assert!(parse_inbound_envelope("getCamera()").is_err());
    }

    #[test]
    fn unit_correlation_ids_are_unique_and_reject_blank_values() {
        assert_ne!(CorrelationId::mint(), CorrelationId::mint());
        assert!(CorrelationId::new("  ").is_none());
    }

    #[test]
    fn unit_frame_into_text_requires_utf8_for_binary() {
        assert_eq!(
            Frame::Binary(b"{}".to_vec()).into_text().as_deref(),
            Some("{}")
        );
        assert!(Frame::Binary(vec![0xff, 0xfe]).into_text().is_none());
        assert_eq!(Frame::Text("abc".to_string()).len(), 3);
    }
}
