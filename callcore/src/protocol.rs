//! Signaling messages exchanged with the relay server.
//!
//! Every call-related frame on the shared socket is one [`SignalMessage`]:
//!
//! ```json
//! {"event": "call_request", "data": {"call_id": "...", "caller_id": 1, ...}}
//! ```
//!
//! The `event` field doubles as the socket event name, so handlers can
//! subscribe to exactly the names in [`SignalMessage::EVENT_NAMES`] and leave
//! the rest of the chat traffic alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::types::call::{CallId, EndReason, UserId};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} signal carries a {found} description")]
    DescriptionMismatch {
        kind: PeerSignalKind,
        found: SdpType,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Caller → relay → callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub caller_username: String,
    pub callee_id: UserId,
}

/// Callee's accept/reject decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAccepted {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRejected {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<UserId>,
    pub reason: EndReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnded {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

/// Relay reports the callee is offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUnavailable {
    pub callee_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

/// Relay failed to process a call request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallErrorNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerSignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl fmt::Display for PeerSignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        })
    }
}

/// Session description in the browser's `RTCSessionDescription` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in the browser's `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// e.g. `candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host`
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }
}

/// Typed content of a [`PeerSignal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

/// Body of a `webrtc_signal` frame.
///
/// `data` stays untyped on the wire; [`PeerSignal::payload`] validates it
/// against `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSignal {
    pub call_id: CallId,
    #[serde(rename = "type")]
    pub kind: PeerSignalKind,
    pub data: Value,
    pub target_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
}

impl PeerSignal {
    pub fn new(
        call_id: CallId,
        sender_id: UserId,
        target_id: UserId,
        payload: &SignalPayload,
    ) -> Result<Self, ProtocolError> {
        let (kind, data) = match payload {
            SignalPayload::Offer(desc) => (PeerSignalKind::Offer, serde_json::to_value(desc)?),
            SignalPayload::Answer(desc) => (PeerSignalKind::Answer, serde_json::to_value(desc)?),
            SignalPayload::IceCandidate(c) => {
                (PeerSignalKind::IceCandidate, serde_json::to_value(c)?)
            }
        };
        Ok(Self {
            call_id,
            kind,
            data,
            target_id,
            sender_id: Some(sender_id),
        })
    }

    pub fn payload(&self) -> Result<SignalPayload, ProtocolError> {
        let malformed = |source| ProtocolError::Malformed {
            event: format!("webrtc_signal/{}", self.kind),
            source,
        };
        match self.kind {
            PeerSignalKind::Offer | PeerSignalKind::Answer => {
                let desc: SessionDescription =
                    serde_json::from_value(self.data.clone()).map_err(malformed)?;
                match (self.kind, desc.sdp_type) {
                    (PeerSignalKind::Offer, SdpType::Offer) => Ok(SignalPayload::Offer(desc)),
                    (PeerSignalKind::Answer, SdpType::Answer) => Ok(SignalPayload::Answer(desc)),
                    (kind, found) => Err(ProtocolError::DescriptionMismatch { kind, found }),
                }
            }
            PeerSignalKind::IceCandidate => serde_json::from_value(self.data.clone())
                .map(SignalPayload::IceCandidate)
                .map_err(malformed),
        }
    }
}

/// The one message type carried by the signaling channel for calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalMessage {
    CallRequest(CallRequest),
    CallResponse(CallResponse),
    CallAccepted(CallAccepted),
    CallRejected(CallRejected),
    WebrtcSignal(PeerSignal),
    CallEnded(CallEnded),
    CallUnavailable(CallUnavailable),
    CallError(CallErrorNotice),
}

impl SignalMessage {
    pub const CALL_REQUEST: &'static str = "call_request";
    pub const CALL_RESPONSE: &'static str = "call_response";
    pub const CALL_ACCEPTED: &'static str = "call_accepted";
    pub const CALL_REJECTED: &'static str = "call_rejected";
    pub const WEBRTC_SIGNAL: &'static str = "webrtc_signal";
    pub const CALL_ENDED: &'static str = "call_ended";
    pub const CALL_UNAVAILABLE: &'static str = "call_unavailable";
    pub const CALL_ERROR: &'static str = "call_error";

    /// Every event name owned by the call module.
    pub const EVENT_NAMES: [&'static str; 8] = [
        Self::CALL_REQUEST,
        Self::CALL_RESPONSE,
        Self::CALL_ACCEPTED,
        Self::CALL_REJECTED,
        Self::WEBRTC_SIGNAL,
        Self::CALL_ENDED,
        Self::CALL_UNAVAILABLE,
        Self::CALL_ERROR,
    ];

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::CallRequest(_) => Self::CALL_REQUEST,
            Self::CallResponse(_) => Self::CALL_RESPONSE,
            Self::CallAccepted(_) => Self::CALL_ACCEPTED,
            Self::CallRejected(_) => Self::CALL_REJECTED,
            Self::WebrtcSignal(_) => Self::WEBRTC_SIGNAL,
            Self::CallEnded(_) => Self::CALL_ENDED,
            Self::CallUnavailable(_) => Self::CALL_UNAVAILABLE,
            Self::CallError(_) => Self::CALL_ERROR,
        }
    }

    /// Call the message refers to, if it names one.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::CallRequest(m) => Some(&m.call_id),
            Self::CallResponse(m) => Some(&m.call_id),
            Self::CallAccepted(m) => Some(&m.call_id),
            Self::CallRejected(m) => Some(&m.call_id),
            Self::WebrtcSignal(m) => Some(&m.call_id),
            Self::CallEnded(m) => Some(&m.call_id),
            Self::CallUnavailable(m) => m.call_id.as_ref(),
            Self::CallError(m) => m.call_id.as_ref(),
        }
    }

    pub fn is_call_event(event: &str) -> bool {
        Self::EVENT_NAMES.contains(&event)
    }

    /// Build a message from a socket event name and its JSON body.
    pub fn from_event(event: &str, data: Value) -> Result<Self, ProtocolError> {
        if !Self::is_call_event(event) {
            return Err(ProtocolError::UnknownEvent(event.to_string()));
        }
        let frame = serde_json::json!({ "event": event, "data": data });
        serde_json::from_value(frame).map_err(|source| ProtocolError::Malformed {
            event: event.to_string(),
            source,
        })
    }

    /// Split into socket event name and JSON body.
    pub fn to_event(&self) -> Result<(&'static str, Value), ProtocolError> {
        let mut frame = serde_json::to_value(self)?;
        let data = frame
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.event_name(), data))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Value = serde_json::from_str(text)?;
        let event = frame
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = frame.get("data").cloned().unwrap_or(Value::Null);
        Self::from_event(&event, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_request_frame_shape() {
        let msg = SignalMessage::CallRequest(CallRequest {
            call_id: CallId::new("c1"),
            caller_id: UserId(1),
            caller_username: "alice".into(),
            callee_id: UserId(2),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "call_request",
                "data": {
                    "call_id": "c1",
                    "caller_id": 1,
                    "caller_username": "alice",
                    "callee_id": 2
                }
            })
        );
    }

    #[test]
    fn test_busy_rejection_frame() {
        let msg = SignalMessage::CallRejected(CallRejected {
            call_id: CallId::new("c2"),
            caller_id: None,
            reason: EndReason::Busy,
        });
        let (event, data) = msg.to_event().unwrap();
        assert_eq!(event, "call_rejected");
        assert_eq!(data, json!({"call_id": "c2", "reason": "busy"}));
    }

    #[test]
    fn test_from_event_rejects_foreign_names() {
        let err = SignalMessage::from_event("message", json!({"text": "hi"})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(_)));
    }

    #[test]
    fn test_from_event_reports_missing_fields() {
        let err = SignalMessage::from_event("call_request", json!({"call_id": "c1"})).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_relayed_response_without_reason() {
        let msg = SignalMessage::from_event(
            "call_response",
            json!({"call_id": "c1", "caller_id": 1, "accepted": true}),
        )
        .unwrap();
        match msg {
            SignalMessage::CallResponse(resp) => {
                assert!(resp.accepted);
                assert_eq!(resp.reason, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_peer_signal_payloads() {
        let offer = PeerSignal::new(
            CallId::new("c1"),
            UserId(1),
            UserId(2),
            &SignalPayload::Offer(SessionDescription::offer("v=0")),
        )
        .unwrap();
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["data"], json!({"type": "offer", "sdp": "v=0"}));
        assert_eq!(
            offer.payload().unwrap(),
            SignalPayload::Offer(SessionDescription::offer("v=0"))
        );

        let candidate = IceCandidate::new("candidate:1 1 UDP 1 10.0.0.1 9 typ host")
            .with_sdp_mid("0")
            .with_sdp_m_line_index(0);
        let ice = PeerSignal::new(
            CallId::new("c1"),
            UserId(2),
            UserId(1),
            &SignalPayload::IceCandidate(candidate.clone()),
        )
        .unwrap();
        let value = serde_json::to_value(&ice).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["data"]["sdpMLineIndex"], 0);
        assert_eq!(value["data"]["sdpMid"], "0");
        assert_eq!(ice.payload().unwrap(), SignalPayload::IceCandidate(candidate));
    }

    #[test]
    fn test_peer_signal_description_mismatch() {
        let signal = PeerSignal {
            call_id: CallId::new("c1"),
            kind: PeerSignalKind::Offer,
            data: json!({"type": "answer", "sdp": "v=0"}),
            target_id: UserId(2),
            sender_id: None,
        };
        assert!(matches!(
            signal.payload(),
            Err(ProtocolError::DescriptionMismatch { .. })
        ));

        let garbage = PeerSignal {
            data: json!("nope"),
            kind: PeerSignalKind::IceCandidate,
            ..signal
        };
        assert!(matches!(
            garbage.payload(),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_round_trips_encoded_text() {
        let msg = SignalMessage::CallEnded(CallEnded {
            call_id: CallId::new("c9"),
            target_id: Some(UserId(5)),
            reason: Some(EndReason::Hangup),
        });
        let text = msg.encode().unwrap();
        assert_eq!(SignalMessage::decode(&text).unwrap(), msg);
        assert_eq!(msg.call_id(), Some(&CallId::new("c9")));
    }
}
