//! Sequential execution of peer-connection operations.
//!
//! Descriptions and candidates must reach the peer connection in the order
//! they were received. Each session gets one worker task that drains a queue
//! of [`PeerOp`]s one at a time.

use super::messages::{CallCommand, NegotiationOutcome};
use super::timer::ScopedTask;
use callcore::media::{LocalStream, PeerConnection, PeerError};
use callcore::protocol::{IceCandidate, SessionDescription};
use callcore::types::CallId;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum PeerOp {
    AttachStream(Arc<dyn LocalStream>),
    CreateOffer,
    CreateAnswer,
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
}

impl PeerOp {
    fn name(&self) -> &'static str {
        match self {
            Self::AttachStream(_) => "attach-stream",
            Self::CreateOffer => "create-offer",
            Self::CreateAnswer => "create-answer",
            Self::SetRemote(_) => "set-remote",
            Self::AddCandidate(_) => "add-candidate",
        }
    }
}

#[derive(Debug)]
pub struct NegotiationQueue {
    ops: mpsc::UnboundedSender<PeerOp>,
    _worker: ScopedTask,
}

impl NegotiationQueue {
    pub fn start(
        call_id: CallId,
        peer: Arc<dyn PeerConnection>,
        mailbox: mpsc::WeakSender<CallCommand>,
    ) -> Self {
        let (ops, ops_rx) = mpsc::unbounded_channel();
        let worker = ScopedTask::spawn(run_worker(call_id, peer, ops_rx, mailbox));
        Self {
            ops,
            _worker: worker,
        }
    }

    pub fn push(&self, op: PeerOp) {
        if self.ops.send(op).is_err() {
            debug!(target: "Call/Negotiation", "Worker stopped; dropping operation");
        }
    }
}

async fn run_worker(
    call_id: CallId,
    peer: Arc<dyn PeerConnection>,
    mut ops: mpsc::UnboundedReceiver<PeerOp>,
    mailbox: mpsc::WeakSender<CallCommand>,
) {
    while let Some(op) = ops.recv().await {
        let name = op.name();
        let is_candidate = matches!(op, PeerOp::AddCandidate(_));
        debug!(target: "Call/Negotiation", "[{call_id}] {name}");
        match execute(peer.as_ref(), op).await {
            Ok(None) => {}
            Ok(Some(desc)) => {
                post(&mailbox, &call_id, NegotiationOutcome::LocalDescription(desc)).await;
            }
            // Candidate failures do not end the call; more will follow.
            Err(e) if is_candidate => {
                warn!(target: "Call/Negotiation", "[{call_id}] Failed to add ICE candidate: {e}");
            }
            Err(e) => {
                warn!(target: "Call/Negotiation", "[{call_id}] {name} failed: {e}");
                post(&mailbox, &call_id, NegotiationOutcome::Failed(e.to_string())).await;
                break;
            }
        }
    }
    debug!(target: "Call/Negotiation", "[{call_id}] Worker finished");
}

async fn execute(
    peer: &dyn PeerConnection,
    op: PeerOp,
) -> Result<Option<SessionDescription>, PeerError> {
    match op {
        PeerOp::AttachStream(stream) => {
            for track in stream.audio_tracks() {
                peer.add_track(track).await?;
            }
            Ok(None)
        }
        PeerOp::CreateOffer => {
            let offer = peer.create_offer().await?;
            peer.set_local_description(offer.clone()).await?;
            Ok(Some(offer))
        }
        PeerOp::CreateAnswer => {
            let answer = peer.create_answer().await?;
            peer.set_local_description(answer.clone()).await?;
            Ok(Some(answer))
        }
        PeerOp::SetRemote(desc) => {
            peer.set_remote_description(desc).await?;
            Ok(None)
        }
        PeerOp::AddCandidate(candidate) => {
            peer.add_ice_candidate(candidate).await?;
            Ok(None)
        }
    }
}

async fn post(
    mailbox: &mpsc::WeakSender<CallCommand>,
    call_id: &CallId,
    outcome: NegotiationOutcome,
) {
    if let Some(tx) = mailbox.upgrade() {
        let _ = tx
            .send(CallCommand::Negotiated {
                call_id: call_id.clone(),
                outcome,
            })
            .await;
    }
}
