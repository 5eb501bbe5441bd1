//! Call-related error types.

use callcore::media::{MediaError, PeerError};
use callcore::protocol::ProtocolError;
use callcore::types::{CallId, EndReason};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("media access denied: {0}")]
    MediaDenied(#[from] MediaError),

    #[error("signaling channel unavailable")]
    ChannelUnavailable,

    #[error("stale message for call {0}")]
    StaleMessage(CallId),

    #[error("duplicate {0} ignored")]
    Duplicate(&'static str),

    #[error("remote party is busy")]
    RemoteBusy,

    #[error("remote party rejected the call ({0:?})")]
    RemoteRejected(EndReason),

    #[error("no answer")]
    NoAnswer,

    #[error("peer connection failed: {0}")]
    PeerConnectionFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolError),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("already in a call")]
    AlreadyInCall,

    #[error("no active call")]
    NoActiveCall,

    #[error("call controller has shut down")]
    ControllerClosed,
}

impl From<PeerError> for CallError {
    fn from(err: PeerError) -> Self {
        Self::PeerConnectionFailed(err.to_string())
    }
}

impl CallError {
    /// Stale and duplicate deliveries are expected under at-least-once
    /// signaling and are only logged.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::StaleMessage(_) | Self::Duplicate(_))
    }

    /// Reason to end the active call with, for errors that terminate it.
    ///
    /// `None` means the error leaves the session untouched.
    pub fn end_reason(&self) -> Option<EndReason> {
        match self {
            Self::MediaDenied(_) => Some(EndReason::MediaDenied),
            Self::ChannelUnavailable => Some(EndReason::ChannelUnavailable),
            Self::RemoteBusy => Some(EndReason::Busy),
            Self::RemoteRejected(reason) => Some(*reason),
            Self::NoAnswer => Some(EndReason::NoAnswer),
            Self::PeerConnectionFailed(_) => Some(EndReason::PeerConnectionFailed),
            Self::StaleMessage(_)
            | Self::Duplicate(_)
            | Self::ProtocolViolation(_)
            | Self::InvalidTransition(_)
            | Self::AlreadyInCall
            | Self::NoActiveCall
            | Self::ControllerClosed => None,
        }
    }
}
