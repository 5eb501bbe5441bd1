//! The single active call and every resource it owns.

use super::error::CallError;
use super::messages::CallCommand;
use super::negotiation::{NegotiationQueue, PeerOp};
use super::state::CallInfo;
use super::timer::ScopedTask;
use callcore::media::{
    IceServer, LocalStream, MediaTrack, PeerConnection, PeerConnectionFactory, PeerEvent,
};
use callcore::protocol::{IceCandidate, SessionDescription};
use callcore::types::{CallId, CallState, SessionView};
use log::debug;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Owned state of the one call being tracked.
///
/// Dropping a session releases everything: timers and background tasks are
/// aborted, the peer connection is closed and the local stream stopped.
pub struct CallSession {
    pub info: CallInfo,
    pub local_stream: Option<Arc<dyn LocalStream>>,
    pub remote_tracks: Vec<Arc<dyn MediaTrack>>,
    peer: Option<Arc<dyn PeerConnection>>,
    negotiation: Option<NegotiationQueue>,
    peer_events: Option<ScopedTask>,
    /// No-answer (caller) or ring (callee) timeout.
    pub pending_timeout: Option<ScopedTask>,
    pub elapsed_ticker: Option<ScopedTask>,
    /// Monotonic start of `Connected`, for the elapsed display.
    pub connected_at: Option<Instant>,
    pub is_muted: bool,
    /// Caller: `call_request` has gone out.
    pub request_sent: bool,
    /// Callee: accepted locally, microphone request in flight.
    pub answering: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl CallSession {
    pub fn new(info: CallInfo) -> Self {
        Self {
            info,
            local_stream: None,
            remote_tracks: Vec::new(),
            peer: None,
            negotiation: None,
            peer_events: None,
            pending_timeout: None,
            elapsed_ticker: None,
            connected_at: None,
            is_muted: false,
            request_sent: false,
            answering: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.info.call_id
    }

    pub fn state(&self) -> CallState {
        self.info.state
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn view(&self) -> SessionView {
        let elapsed_seconds = match self.info.state {
            CallState::Connected => self.connected_at.map(|t| t.elapsed().as_secs()),
            _ => None,
        };
        SessionView {
            call_id: Some(self.info.call_id.clone()),
            state: self.info.state,
            remote_user_id: Some(self.info.remote_user_id),
            remote_display_name: self.info.remote_display_name.clone(),
            is_initiator: self.info.is_initiator(),
            elapsed_seconds,
            is_muted: self.is_muted,
            end_reason: self.info.end_reason,
        }
    }

    /// Creates the peer connection, forwards its events to the controller
    /// mailbox and starts the negotiation queue with the local stream
    /// attached.
    pub fn open_peer(
        &mut self,
        factory: &dyn PeerConnectionFactory,
        ice_servers: &[IceServer],
        mailbox: &mpsc::WeakSender<CallCommand>,
    ) -> Result<(), CallError> {
        if self.peer.is_some() {
            return Err(CallError::Duplicate("peer connection"));
        }
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let peer = factory.create(ice_servers, events_tx)?;

        let call_id = self.info.call_id.clone();
        let forward_to = mailbox.clone();
        self.peer_events = Some(ScopedTask::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(tx) = forward_to.upgrade() else {
                    break;
                };
                let command = CallCommand::Peer {
                    call_id: call_id.clone(),
                    event,
                };
                if tx.send(command).await.is_err() {
                    break;
                }
            }
        }));

        let queue =
            NegotiationQueue::start(self.info.call_id.clone(), peer.clone(), mailbox.clone());
        if let Some(stream) = &self.local_stream {
            queue.push(PeerOp::AttachStream(stream.clone()));
        }
        self.negotiation = Some(queue);
        self.peer = Some(peer);
        Ok(())
    }

    pub fn create_offer(&self) {
        self.push(PeerOp::CreateOffer);
    }

    pub fn create_answer(&self) {
        self.push(PeerOp::CreateAnswer);
    }

    /// Queues the remote description, then any candidates that were waiting
    /// for it. Returns `false` if one was already applied.
    pub fn apply_remote_description(&mut self, desc: SessionDescription) -> bool {
        if self.remote_description_set || self.negotiation.is_none() {
            return false;
        }
        self.remote_description_set = true;
        self.push(PeerOp::SetRemote(desc));
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.push(PeerOp::AddCandidate(candidate));
        }
        true
    }

    /// Queues a remote candidate, or buffers it until the remote description
    /// is in place.
    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.remote_description_set && self.negotiation.is_some() {
            self.push(PeerOp::AddCandidate(candidate));
        } else {
            debug!(
                target: "Call/Negotiation",
                "[{}] Buffering ICE candidate until remote description is set",
                self.info.call_id
            );
            self.pending_candidates.push(candidate);
        }
    }

    /// Flips the enabled flag of every local audio track. Returns the new mute
    /// state, or `None` when there is no local stream yet.
    pub fn toggle_mute(&mut self) -> Option<bool> {
        let stream = self.local_stream.as_ref()?;
        self.is_muted = !self.is_muted;
        for track in stream.audio_tracks() {
            track.set_enabled(!self.is_muted);
        }
        Some(self.is_muted)
    }

    fn push(&self, op: PeerOp) {
        if let Some(queue) = &self.negotiation {
            queue.push(op);
        }
    }

    fn release(&mut self) {
        self.pending_timeout = None;
        self.elapsed_ticker = None;
        self.peer_events = None;
        self.negotiation = None;
        if let Some(peer) = self.peer.take() {
            let call_id = self.info.call_id.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        peer.close().await;
                        debug!(target: "Call/Controller", "[{call_id}] Peer connection closed");
                    });
                }
                Err(_) => debug!(
                    target: "Call/Controller",
                    "[{call_id}] No runtime to close peer connection on"
                ),
            }
        }
        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        self.remote_tracks.clear();
        self.pending_candidates.clear();
        self.is_muted = false;
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("info", &self.info)
            .field("has_local_stream", &self.local_stream.is_some())
            .field("remote_tracks", &self.remote_tracks.len())
            .field("has_peer", &self.peer.is_some())
            .field("is_muted", &self.is_muted)
            .field("request_sent", &self.request_sent)
            .field("answering", &self.answering)
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish_non_exhaustive()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackMedia, LoopbackPeerFactory};
    use callcore::media::MediaSource;
    use callcore::types::UserId;
    use std::time::Duration;

    fn outgoing() -> CallSession {
        CallSession::new(CallInfo::new_outgoing(
            CallId::new("c1"),
            UserId(1),
            UserId(2),
            Some("bob".into()),
        ))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_candidates_wait_for_remote_description() {
        let (tx, _rx) = mpsc::channel(16);
        let factory = LoopbackPeerFactory::new();
        let mut session = outgoing();
        session
            .open_peer(&factory, &[], &tx.downgrade())
            .expect("peer opens");

        session.add_remote_candidate(IceCandidate::new("candidate:1 1 UDP 1 10.0.0.2 9 typ host"));
        session.add_remote_candidate(IceCandidate::new("candidate:2 1 UDP 1 10.0.0.3 9 typ host"));
        assert_eq!(session.pending_candidate_count(), 2);
        assert!(!session.has_remote_description());

        assert!(session.apply_remote_description(SessionDescription::answer("v=0")));
        assert!(!session.apply_remote_description(SessionDescription::answer("v=0")));
        assert_eq!(session.pending_candidate_count(), 0);
        settle().await;

        let peer = factory.last().expect("peer created");
        assert_eq!(
            peer.ops(),
            vec!["set_remote:answer", "add_candidate", "add_candidate"]
        );
        assert_eq!(peer.remote_candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_second_peer_is_refused() {
        let (tx, _rx) = mpsc::channel(16);
        let factory = LoopbackPeerFactory::new();
        let mut session = outgoing();
        session.open_peer(&factory, &[], &tx.downgrade()).unwrap();

        let err = session.open_peer(&factory, &[], &tx.downgrade()).unwrap_err();
        assert!(matches!(err, CallError::Duplicate(_)));
        assert_eq!(factory.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_mute_flips_audio_tracks() {
        let media = LoopbackMedia::new();
        let mut session = outgoing();
        assert_eq!(session.toggle_mute(), None);

        session.local_stream = Some(media.acquire_audio().await.unwrap());
        let mic = media.streams()[0].microphone().clone();

        assert_eq!(session.toggle_mute(), Some(true));
        assert!(!mic.is_enabled());
        assert!(session.view().is_muted);

        assert_eq!(session.toggle_mute(), Some(false));
        assert!(mic.is_enabled());
    }

    #[tokio::test]
    async fn test_drop_releases_everything() {
        let (tx, _rx) = mpsc::channel(16);
        let media = LoopbackMedia::new();
        let factory = LoopbackPeerFactory::new();

        let mut session = outgoing();
        session.local_stream = Some(media.acquire_audio().await.unwrap());
        session.pending_timeout = Some(ScopedTask::spawn(std::future::pending()));
        session.open_peer(&factory, &[], &tx.downgrade()).unwrap();
        settle().await;

        let peer = factory.last().unwrap();
        assert_eq!(peer.local_tracks().len(), 1);

        drop(session);
        settle().await;

        assert!(media.streams()[0].is_stopped());
        assert!(peer.is_closed());
        assert_eq!(peer.ops().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_view_has_no_elapsed_before_connected() {
        let session = outgoing();
        let view = session.view();
        assert_eq!(view.state, CallState::Calling);
        assert_eq!(view.elapsed_seconds, None);
        assert!(view.is_initiator);
        assert_eq!(view.display_name(), "bob");
    }
}
