#![no_main]

use libfuzzer_sys::fuzz_target;
use resolink_client::{parse_inbound_envelope, Frame};

fuzz_target!(|data: &[u8]| {
    let Some(text) = Frame::Binary(data.to_vec()).into_text() else {
        return;
    };

    if let Ok(envelope) = parse_inbound_envelope(&text) {
        assert!(!envelope.fields.contains_key("sourceMessageId"));
        assert!(!envelope.fields.contains_key("success"));
        let encoded = serde_json::to_string(&envelope).expect("reply re-encodes");
        let reparsed = parse_inbound_envelope(&encoded).expect("re-encoded reply parses");
        assert_eq!(reparsed.source_message_id, envelope.source_message_id);
        assert_eq!(reparsed.success, envelope.success);
    }
});
