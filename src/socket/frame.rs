use super::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One text frame on the signaling socket: `{"event": <name>, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcore::protocol::SignalMessage;
    use serde_json::json;

    #[test]
    fn test_frame_matches_signal_message_encoding() {
        let frame = EventFrame::new(
            "call_ended",
            json!({"call_id": "c1", "target_id": 2, "reason": "hangup"}),
        );
        let text = frame.encode().unwrap();
        let message = SignalMessage::decode(&text).unwrap();
        assert_eq!(message.event_name(), "call_ended");
        assert_eq!(EventFrame::decode(&message.encode().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let frame = EventFrame::decode(r#"{"event": "ping"}"#).unwrap();
        assert_eq!(frame.event, "ping");
        assert!(frame.data.is_null());
        assert!(EventFrame::decode("not json").is_err());
    }
}
