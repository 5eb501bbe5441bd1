use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a single call attempt.
///
/// Generated by the caller, echoed by the callee. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 16 random bytes rendered as 32 upper-case hex characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Chat user identifier as assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Externally visible call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call tracked.
    #[default]
    Idle,
    /// We placed the call and are waiting for the remote party.
    Calling,
    /// Someone is calling us.
    Ringing,
    /// Both sides accepted; peer connection negotiating.
    Connecting,
    /// Media flowing.
    Connected,
    /// Transient; reported once before folding back to `Idle`.
    Ended,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Calling => "calling",
            Self::Ringing => "ringing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Why a call attempt or an established call ended.
///
/// Serialized as the snake_case `reason` string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// We hung up or cancelled.
    Hangup,
    /// The other party hung up.
    RemoteHangup,
    Busy,
    Rejected,
    NoAnswer,
    MediaDenied,
    ChannelUnavailable,
    PeerConnectionFailed,
    /// The callee is not online.
    Unavailable,
    ServerError,
    #[serde(other)]
    Unknown,
}

impl EndReason {
    /// Text for the single user-facing notification about this ending.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Hangup => "Call ended",
            Self::RemoteHangup => "Call ended by the other user.",
            Self::Busy => "User is busy.",
            Self::Rejected => "Call was declined.",
            Self::NoAnswer => "No answer",
            Self::MediaDenied => {
                "Microphone access denied. Please allow microphone access in your browser settings."
            }
            Self::ChannelUnavailable => "Connection error, cannot send call signal.",
            Self::PeerConnectionFailed => "Call ended or disconnected.",
            Self::Unavailable => "User is not available.",
            Self::ServerError => "Call error",
            Self::Unknown => "Call ended",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Read-only snapshot handed to the presenter on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionView {
    pub call_id: Option<CallId>,
    pub state: CallState,
    pub remote_user_id: Option<UserId>,
    pub remote_display_name: Option<String>,
    pub is_initiator: bool,
    pub elapsed_seconds: Option<u64>,
    pub is_muted: bool,
    pub end_reason: Option<EndReason>,
}

impl SessionView {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Elapsed time as `MM:SS`, only while connected.
    pub fn elapsed_formatted(&self) -> Option<String> {
        self.elapsed_seconds
            .map(|secs| format!("{:02}:{:02}", secs / 60, secs % 60))
    }

    pub fn display_name(&self) -> &str {
        self.remote_display_name.as_deref().unwrap_or("User")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_call_ids_are_unique_hex() {
        let a = CallId::generate();
        let b = CallId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn test_end_reason_wire_names() {
        assert_eq!(serde_json::to_string(&EndReason::Busy).unwrap(), "\"busy\"");
        assert_eq!(
            serde_json::to_string(&EndReason::NoAnswer).unwrap(),
            "\"no_answer\""
        );
        let unknown: EndReason = serde_json::from_str("\"User is busy\"").unwrap();
        assert_eq!(unknown, EndReason::Unknown);
    }

    #[test]
    fn test_elapsed_formatting() {
        let view = SessionView {
            state: CallState::Connected,
            elapsed_seconds: Some(125),
            ..SessionView::idle()
        };
        assert_eq!(view.elapsed_formatted().as_deref(), Some("02:05"));
        assert_eq!(SessionView::idle().elapsed_formatted(), None);
    }

    #[test]
    fn test_user_id_is_transparent_number() {
        let id: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(id, UserId(42));
        assert_eq!(serde_json::to_string(&UserId(7)).unwrap(), "7");
    }
}
