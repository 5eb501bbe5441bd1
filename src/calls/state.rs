//! Call state machine implementation.

use callcore::types::{CallDirection, CallId, CallState, EndReason, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// State transitions for calls.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    RemoteAccepted,
    LocalAccepted,
    MediaConnected,
    Terminated { reason: EndReason },
}

/// Identity and lifecycle of one call attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub local_user_id: UserId,
    pub remote_user_id: UserId,
    /// Known immediately for incoming calls, on acceptance for outgoing ones
    /// unless the caller supplied it.
    pub remote_display_name: Option<String>,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    /// Set only on entry to `Connected`.
    pub started_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl CallInfo {
    pub fn new_outgoing(
        call_id: CallId,
        local_user_id: UserId,
        remote_user_id: UserId,
        remote_display_name: Option<String>,
    ) -> Self {
        Self {
            call_id,
            direction: CallDirection::Outgoing,
            local_user_id,
            remote_user_id,
            remote_display_name,
            state: CallState::Calling,
            created_at: Utc::now(),
            started_at: None,
            end_reason: None,
        }
    }

    pub fn new_incoming(
        call_id: CallId,
        local_user_id: UserId,
        remote_user_id: UserId,
        remote_display_name: String,
    ) -> Self {
        Self {
            call_id,
            direction: CallDirection::Incoming,
            local_user_id,
            remote_user_id,
            remote_display_name: Some(remote_display_name),
            state: CallState::Ringing,
            created_at: Utc::now(),
            started_at: None,
            end_reason: None,
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        let new_state = match (self.state, transition) {
            (CallState::Calling, CallTransition::RemoteAccepted) => CallState::Connecting,
            (CallState::Ringing, CallTransition::LocalAccepted) => CallState::Connecting,
            (CallState::Connecting, CallTransition::MediaConnected) => {
                self.started_at = Some(Utc::now());
                CallState::Connected
            }
            (
                CallState::Calling
                | CallState::Ringing
                | CallState::Connecting
                | CallState::Connected,
                CallTransition::Terminated { reason },
            ) => {
                self.end_reason = Some(reason);
                CallState::Ended
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: current,
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: CallState,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outgoing_call() -> CallInfo {
        CallInfo::new_outgoing(
            CallId::new("AC90CFD09DF712D981142B172706F9F2"),
            UserId(1),
            UserId(2),
            None,
        )
    }

    fn make_incoming_call() -> CallInfo {
        CallInfo::new_incoming(
            CallId::new("BC5BD1EDE9BBE601F408EF3795479E93"),
            UserId(2),
            UserId(1),
            "alice".to_string(),
        )
    }

    /// Flow: Calling → Connecting → Connected → Ended
    #[test]
    fn test_outgoing_call_flow() {
        let mut call = make_outgoing_call();
        assert_eq!(call.state, CallState::Calling);
        assert!(call.is_initiator());

        call.apply_transition(CallTransition::RemoteAccepted).unwrap();
        assert_eq!(call.state, CallState::Connecting);
        assert!(call.started_at.is_none());

        call.apply_transition(CallTransition::MediaConnected).unwrap();
        assert_eq!(call.state, CallState::Connected);
        assert!(call.started_at.is_some());

        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Hangup,
        })
        .unwrap();
        assert_eq!(call.state, CallState::Ended);
        assert_eq!(call.end_reason, Some(EndReason::Hangup));
    }

    /// Flow: Ringing → Connecting → Connected
    #[test]
    fn test_incoming_call_flow() {
        let mut call = make_incoming_call();
        assert_eq!(call.state, CallState::Ringing);
        assert!(!call.is_initiator());
        assert_eq!(call.remote_display_name.as_deref(), Some("alice"));

        call.apply_transition(CallTransition::LocalAccepted).unwrap();
        call.apply_transition(CallTransition::MediaConnected).unwrap();
        assert_eq!(call.state, CallState::Connected);
    }

    #[test]
    fn test_outgoing_call_rejected() {
        let mut call = make_outgoing_call();
        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Busy,
        })
        .unwrap();
        assert_eq!(call.state, CallState::Ended);
        assert_eq!(call.end_reason, Some(EndReason::Busy));
    }

    /// The caller cannot accept on the callee's behalf and vice versa.
    #[test]
    fn test_accept_direction_is_enforced() {
        let mut outgoing = make_outgoing_call();
        assert!(outgoing.apply_transition(CallTransition::LocalAccepted).is_err());

        let mut incoming = make_incoming_call();
        assert!(incoming.apply_transition(CallTransition::RemoteAccepted).is_err());
    }

    #[test]
    fn test_duplicate_accept_is_invalid() {
        let mut call = make_outgoing_call();
        call.apply_transition(CallTransition::RemoteAccepted).unwrap();
        let err = call.apply_transition(CallTransition::RemoteAccepted).unwrap_err();
        assert_eq!(err.current_state, CallState::Connecting);
    }

    #[test]
    fn test_media_connected_requires_connecting() {
        let mut call = make_incoming_call();
        assert!(call.apply_transition(CallTransition::MediaConnected).is_err());
    }

    #[test]
    fn test_ended_call_rejects_transitions() {
        let mut call = make_incoming_call();
        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Rejected,
        })
        .unwrap();

        assert!(call.apply_transition(CallTransition::LocalAccepted).is_err());
        assert!(
            call.apply_transition(CallTransition::Terminated {
                reason: EndReason::Hangup,
            })
            .is_err()
        );
        assert_eq!(call.end_reason, Some(EndReason::Rejected));
    }
}
