use super::error::CallError;
use callcore::media::{LocalStream, MediaError, PeerEvent};
use callcore::protocol::{SessionDescription, SignalMessage};
use callcore::types::{CallId, SessionView, UserId};
use std::sync::Arc;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T, CallError>>;

// --- Commands for CallSessionController ---
#[derive(Debug)]
pub enum CallCommand {
    // User intents
    PlaceCall {
        remote_id: UserId,
        display_name: Option<String>,
        reply: Reply<CallId>,
    },
    Accept {
        call_id: CallId,
        reply: Reply<()>,
    },
    Reject {
        call_id: CallId,
        reply: Reply<()>,
    },
    HangUp {
        reply: Reply<()>,
    },
    ToggleMute {
        reply: Reply<bool>,
    },

    // Signaling channel
    Inbound(SignalMessage),

    // Completions posted by tasks the controller spawned. Each carries the
    // call it was started for and is re-validated against the live session.
    MediaAcquired {
        call_id: CallId,
        result: Result<Arc<dyn LocalStream>, MediaError>,
    },
    Negotiated {
        call_id: CallId,
        outcome: NegotiationOutcome,
    },
    Peer {
        call_id: CallId,
        event: PeerEvent,
    },
    TimerFired {
        call_id: CallId,
        kind: TimerKind,
    },
    Tick {
        call_id: CallId,
    },

    Snapshot {
        reply: oneshot::Sender<SessionView>,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum NegotiationOutcome {
    /// Offer or answer created and applied locally; ready to send.
    LocalDescription(SessionDescription),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Caller gave up waiting for a response.
    NoAnswer,
    /// Callee let the call ring out.
    Ring,
}
