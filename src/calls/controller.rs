use super::error::CallError;
use super::messages::{CallCommand, NegotiationOutcome, TimerKind};
use super::presenter::{CallPresenter, Notice};
use super::session::CallSession;
use super::state::{CallInfo, CallTransition, InvalidTransition};
use super::timer::ScopedTask;
use crate::config::CallConfig;
use callcore::media::{
    LocalStream, MediaError, MediaSource, PeerConnectionFactory, PeerConnectionState, PeerEvent,
};
use callcore::net::SignalingChannel;
use callcore::protocol::{
    CallEnded, CallRejected, CallRequest, CallResponse, PeerSignal, SdpType, SignalMessage,
    SignalPayload,
};
use callcore::types::{CallId, CallState, EndReason, SessionView, UserId};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Ended call ids kept around so late deliveries for them are recognised.
const RECENT_CALL_HISTORY: usize = 32;

/// The user this controller acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub username: String,
}

impl LocalUser {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// Collaborators the controller drives.
#[derive(Clone)]
pub struct CallBackends {
    pub channel: Arc<dyn SignalingChannel>,
    pub media: Arc<dyn MediaSource>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub presenter: Arc<dyn CallPresenter>,
}

/// Actor that owns the call session.
///
/// Every transition runs to completion inside [`run`](Self::run). Work that
/// has to wait (microphone, offer/answer, timers, peer events) happens in
/// spawned tasks that post a completion back, tagged with the call it belongs
/// to; completions for any other call are dropped.
pub struct CallSessionController {
    user: LocalUser,
    config: CallConfig,
    backends: CallBackends,
    commands: mpsc::Receiver<CallCommand>,
    mailbox: mpsc::WeakSender<CallCommand>,
    session: Option<CallSession>,
    recent: VecDeque<CallId>,
}

impl CallSessionController {
    pub fn new(
        user: LocalUser,
        config: CallConfig,
        backends: CallBackends,
        commands: mpsc::Receiver<CallCommand>,
        mailbox: mpsc::WeakSender<CallCommand>,
    ) -> Self {
        Self {
            user,
            config,
            backends,
            commands,
            mailbox,
            session: None,
            recent: VecDeque::with_capacity(RECENT_CALL_HISTORY),
        }
    }

    pub async fn run(mut self) {
        info!(target: "Call/Controller", "Call controller started for user {}", self.user.id);
        while let Some(command) = self.commands.recv().await {
            if matches!(command, CallCommand::Shutdown) {
                break;
            }
            self.handle_command(command).await;
        }
        if let Some(session) = self.session.take() {
            debug!(target: "Call/Controller", "[{}] Dropping call on shutdown", session.call_id());
        }
        info!(target: "Call/Controller", "Call controller stopped for user {}", self.user.id);
    }

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::PlaceCall {
                remote_id,
                display_name,
                reply,
            } => {
                let result = self.place_call(remote_id, display_name);
                let _ = reply.send(self.settle(result));
            }
            CallCommand::Accept { call_id, reply } => {
                let result = self.accept(&call_id);
                let _ = reply.send(self.settle(result));
            }
            CallCommand::Reject { call_id, reply } => {
                let result = self.reject(&call_id).await;
                let _ = reply.send(self.settle(result));
            }
            CallCommand::HangUp { reply } => {
                let result = self.hang_up().await;
                let _ = reply.send(self.settle(result));
            }
            CallCommand::ToggleMute { reply } => {
                let result = self.toggle_mute();
                let _ = reply.send(self.settle(result));
            }
            CallCommand::Inbound(message) => {
                let result = self.handle_inbound(message).await;
                let _ = self.settle(result);
            }
            CallCommand::MediaAcquired { call_id, result } => {
                let result = self.on_media(call_id, result).await;
                let _ = self.settle(result);
            }
            CallCommand::Negotiated { call_id, outcome } => {
                let result = self.on_negotiated(call_id, outcome).await;
                let _ = self.settle(result);
            }
            CallCommand::Peer { call_id, event } => {
                let result = self.on_peer_event(call_id, event).await;
                let _ = self.settle(result);
            }
            CallCommand::TimerFired { call_id, kind } => {
                let result = self.on_timer(call_id, kind).await;
                let _ = self.settle(result);
            }
            CallCommand::Tick { call_id } => {
                let connected = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.call_id() == &call_id && s.state() == CallState::Connected);
                if connected {
                    self.render();
                }
            }
            CallCommand::Snapshot { reply } => {
                let _ = reply.send(self.view());
            }
            CallCommand::Shutdown => {}
        }
    }

    /// Applies the error policy: stale and duplicate cases are only logged,
    /// terminal errors end the active call, the rest leave state untouched.
    fn settle<T>(&mut self, result: Result<T, CallError>) -> Result<T, CallError> {
        if let Err(e) = &result {
            if e.is_silent() {
                debug!(target: "Call/Controller", "Ignoring: {e}");
            } else if let Some(reason) = e.end_reason() {
                if self.session.is_some() {
                    warn!(target: "Call/Controller", "Ending call: {e}");
                    self.finish(reason);
                }
            } else if matches!(e, CallError::ProtocolViolation(_)) {
                warn!(target: "Call/Controller", "Dropping inbound message: {e}");
            } else {
                debug!(target: "Call/Controller", "Rejected: {e}");
            }
        }
        result
    }

    // --- User intents ---

    fn place_call(
        &mut self,
        remote_id: UserId,
        display_name: Option<String>,
    ) -> Result<CallId, CallError> {
        if self.session.is_some() {
            return Err(CallError::AlreadyInCall);
        }
        if !self.backends.channel.is_connected() {
            return Err(CallError::ChannelUnavailable);
        }

        let call_id = CallId::generate();
        info!(target: "Call/Controller", "[{call_id}] Calling user {remote_id}");
        let info = CallInfo::new_outgoing(call_id.clone(), self.user.id, remote_id, display_name);
        let mut session = CallSession::new(info);
        session.pending_timeout = Some(self.arm_timer(
            &call_id,
            TimerKind::NoAnswer,
            self.config.no_answer_timeout(),
        ));
        self.session = Some(session);
        self.acquire_media(&call_id);
        self.render();
        Ok(call_id)
    }

    fn accept(&mut self, call_id: &CallId) -> Result<(), CallError> {
        let session = matching(&mut self.session, call_id)?;
        match session.state() {
            CallState::Ringing if session.answering => {
                debug!(target: "Call/Controller", "[{call_id}] Already answering");
                Ok(())
            }
            CallState::Ringing => {
                info!(target: "Call/Controller", "[{call_id}] Accepting call");
                session.answering = true;
                session.pending_timeout = None;
                self.acquire_media(call_id);
                Ok(())
            }
            CallState::Connecting | CallState::Connected if !session.info.is_initiator() => {
                debug!(target: "Call/Controller", "[{call_id}] Already accepted");
                Ok(())
            }
            state => Err(invalid(state, "LocalAccepted")),
        }
    }

    async fn reject(&mut self, call_id: &CallId) -> Result<(), CallError> {
        let session = matching(&mut self.session, call_id)?;
        if session.state() != CallState::Ringing {
            return Err(invalid(session.state(), "Reject"));
        }
        let message = SignalMessage::CallResponse(CallResponse {
            call_id: call_id.clone(),
            caller_id: session.info.remote_user_id,
            accepted: false,
            reason: Some(EndReason::Rejected),
        });
        info!(target: "Call/Controller", "[{call_id}] Rejecting call");
        self.emit_best_effort(&message).await;
        self.finish(EndReason::Rejected);
        Ok(())
    }

    async fn hang_up(&mut self) -> Result<(), CallError> {
        let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
        let call_id = session.call_id().clone();
        if session.state() == CallState::Ringing {
            return self.reject(&call_id).await;
        }

        // The remote party only knows about the call once the request went
        // out (caller) or the accept did (callee).
        if session.request_sent || session.has_peer() {
            let message = SignalMessage::CallEnded(CallEnded {
                call_id: call_id.clone(),
                target_id: Some(session.info.remote_user_id),
                reason: Some(EndReason::Hangup),
            });
            self.emit_best_effort(&message).await;
        }
        info!(target: "Call/Controller", "[{call_id}] Hung up");
        self.finish(EndReason::Hangup);
        Ok(())
    }

    fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let session = self.session.as_mut().ok_or(CallError::NoActiveCall)?;
        match session.toggle_mute() {
            Some(muted) => {
                debug!(target: "Call/Controller", "[{}] Muted: {muted}", session.call_id());
                self.render();
                Ok(muted)
            }
            None => Ok(session.is_muted),
        }
    }

    // --- Signaling ---

    async fn handle_inbound(&mut self, message: SignalMessage) -> Result<(), CallError> {
        debug!(target: "Call/Controller", "<-- {}", message.event_name());
        match message {
            SignalMessage::CallRequest(request) => self.on_call_request(request).await,
            SignalMessage::CallAccepted(accepted) => {
                self.on_remote_accepted(accepted.call_id, accepted.callee_username)
            }
            SignalMessage::CallResponse(response) if response.accepted => {
                self.on_remote_accepted(response.call_id, None)
            }
            SignalMessage::CallResponse(response) => self.on_remote_rejected(
                response.call_id,
                response.reason.unwrap_or(EndReason::Rejected),
            ),
            SignalMessage::CallRejected(rejected) => {
                self.on_remote_rejected(rejected.call_id, rejected.reason)
            }
            SignalMessage::WebrtcSignal(signal) => self.on_peer_signal(signal),
            SignalMessage::CallEnded(ended) => {
                matching(&mut self.session, &ended.call_id)?;
                info!(target: "Call/Controller", "[{}] Remote party ended the call", ended.call_id);
                self.finish(EndReason::RemoteHangup);
                Ok(())
            }
            SignalMessage::CallUnavailable(unavailable) => {
                let session = self.outgoing_attempt(unavailable.call_id.as_ref())?;
                if session.info.remote_user_id != unavailable.callee_id {
                    return Err(CallError::StaleMessage(session.call_id().clone()));
                }
                self.finish(EndReason::Unavailable);
                Ok(())
            }
            SignalMessage::CallError(notice) => {
                let session = self.outgoing_attempt(notice.call_id.as_ref())?;
                warn!(
                    target: "Call/Controller",
                    "[{}] Relay error: {}", session.call_id(), notice.message
                );
                self.finish(EndReason::ServerError);
                Ok(())
            }
        }
    }

    async fn on_call_request(&mut self, request: CallRequest) -> Result<(), CallError> {
        if request.callee_id != self.user.id {
            warn!(
                target: "Call/Controller",
                "[{}] Call request addressed to {} received by {}",
                request.call_id, request.callee_id, self.user.id
            );
            return Ok(());
        }

        if let Some(session) = &self.session {
            if session.call_id() == &request.call_id {
                return Err(CallError::Duplicate("call_request"));
            }
            info!(
                target: "Call/Controller",
                "[{}] Busy, rejecting call from {}", request.call_id, request.caller_id
            );
            let message = SignalMessage::CallRejected(CallRejected {
                call_id: request.call_id,
                caller_id: Some(request.caller_id),
                reason: EndReason::Busy,
            });
            self.emit_best_effort(&message).await;
            return Ok(());
        }
        if self.recent.contains(&request.call_id) {
            return Err(CallError::StaleMessage(request.call_id));
        }

        let call_id = request.call_id;
        info!(
            target: "Call/Controller",
            "[{call_id}] Incoming call from {} ({})", request.caller_username, request.caller_id
        );
        let info = CallInfo::new_incoming(
            call_id.clone(),
            self.user.id,
            request.caller_id,
            request.caller_username.clone(),
        );
        let mut session = CallSession::new(info);
        session.pending_timeout =
            Some(self.arm_timer(&call_id, TimerKind::Ring, self.config.ring_timeout()));
        self.session = Some(session);
        self.render();
        self.notify(Notice::info(format!(
            "Incoming call from {}",
            request.caller_username
        )));
        Ok(())
    }

    fn on_remote_accepted(
        &mut self,
        call_id: CallId,
        callee_username: Option<String>,
    ) -> Result<(), CallError> {
        let session = matching(&mut self.session, &call_id)?;
        if !session.info.is_initiator() {
            return Err(invalid(session.state(), "RemoteAccepted"));
        }
        match session.state() {
            CallState::Calling => {}
            CallState::Connecting | CallState::Connected => {
                return Err(CallError::Duplicate("call_accepted"));
            }
            state => return Err(invalid(state, "RemoteAccepted")),
        }
        if session.local_stream.is_none() {
            // The request only goes out once media is ready.
            return Err(invalid(session.state(), "RemoteAccepted before call_request"));
        }

        info!(target: "Call/Controller", "[{call_id}] Call accepted, connecting");
        session.pending_timeout = None;
        if let Some(name) = callee_username {
            session.info.remote_display_name = Some(name);
        }
        session.open_peer(
            self.backends.peers.as_ref(),
            &self.config.ice_servers,
            &self.mailbox,
        )?;
        session.info.apply_transition(CallTransition::RemoteAccepted)?;
        session.create_offer();
        self.render();
        Ok(())
    }

    fn on_remote_rejected(&mut self, call_id: CallId, reason: EndReason) -> Result<(), CallError> {
        let session = matching(&mut self.session, &call_id)?;
        if !session.info.is_initiator() {
            return Err(invalid(session.state(), "RemoteRejected"));
        }
        if session.state() != CallState::Calling {
            return Err(CallError::Duplicate("call_rejected"));
        }
        info!(target: "Call/Controller", "[{call_id}] Call rejected: {reason:?}");
        match reason {
            EndReason::Busy => Err(CallError::RemoteBusy),
            EndReason::NoAnswer => Err(CallError::NoAnswer),
            _ => Err(CallError::RemoteRejected(EndReason::Rejected)),
        }
    }

    fn on_peer_signal(&mut self, signal: PeerSignal) -> Result<(), CallError> {
        let session = matching(&mut self.session, &signal.call_id)?;
        if signal
            .sender_id
            .is_some_and(|sender| sender != session.info.remote_user_id)
        {
            return Err(CallError::StaleMessage(signal.call_id));
        }

        match signal.payload()? {
            SignalPayload::Offer(offer) => {
                if session.info.is_initiator() {
                    return Err(invalid(session.state(), "offer to caller"));
                }
                match session.state() {
                    CallState::Connecting => {}
                    CallState::Connected => return Err(CallError::Duplicate("offer")),
                    state => return Err(invalid(state, "offer")),
                }
                if !session.apply_remote_description(offer) {
                    return Err(CallError::Duplicate("offer"));
                }
                session.create_answer();
                Ok(())
            }
            SignalPayload::Answer(answer) => {
                if !session.info.is_initiator() {
                    return Err(invalid(session.state(), "answer to callee"));
                }
                match session.state() {
                    CallState::Connecting => {}
                    CallState::Connected => return Err(CallError::Duplicate("answer")),
                    state => return Err(invalid(state, "answer")),
                }
                if !session.apply_remote_description(answer) {
                    return Err(CallError::Duplicate("answer"));
                }
                Ok(())
            }
            SignalPayload::IceCandidate(candidate) => {
                session.add_remote_candidate(candidate);
                Ok(())
            }
        }
    }

    // --- Completions ---

    async fn on_media(
        &mut self,
        call_id: CallId,
        result: Result<Arc<dyn LocalStream>, MediaError>,
    ) -> Result<(), CallError> {
        let session = match matching(&mut self.session, &call_id) {
            Ok(session) => session,
            Err(e) => {
                if let Ok(stream) = result {
                    stream.stop();
                }
                return Err(e);
            }
        };
        let waiting = match session.state() {
            CallState::Calling => session.local_stream.is_none(),
            CallState::Ringing => session.answering && session.local_stream.is_none(),
            _ => false,
        };
        if !waiting {
            if let Ok(stream) = result {
                stream.stop();
            }
            return Err(CallError::Duplicate("media stream"));
        }

        match result {
            Ok(stream) => {
                debug!(target: "Call/Controller", "[{call_id}] Microphone ready");
                session.local_stream = Some(stream);
                if session.info.is_initiator() {
                    self.send_call_request().await
                } else {
                    self.complete_answer().await
                }
            }
            Err(e) => {
                if !session.info.is_initiator() {
                    let message = SignalMessage::CallResponse(CallResponse {
                        call_id: call_id.clone(),
                        caller_id: session.info.remote_user_id,
                        accepted: false,
                        reason: Some(EndReason::MediaDenied),
                    });
                    self.emit_best_effort(&message).await;
                }
                Err(CallError::MediaDenied(e))
            }
        }
    }

    async fn send_call_request(&mut self) -> Result<(), CallError> {
        let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
        let message = SignalMessage::CallRequest(CallRequest {
            call_id: session.call_id().clone(),
            caller_id: self.user.id,
            caller_username: self.user.username.clone(),
            callee_id: session.info.remote_user_id,
        });
        self.emit(&message).await?;
        if let Some(session) = self.session.as_mut() {
            session.request_sent = true;
        }
        Ok(())
    }

    async fn complete_answer(&mut self) -> Result<(), CallError> {
        let session = self.session.as_mut().ok_or(CallError::NoActiveCall)?;
        session.open_peer(
            self.backends.peers.as_ref(),
            &self.config.ice_servers,
            &self.mailbox,
        )?;
        session.info.apply_transition(CallTransition::LocalAccepted)?;
        session.answering = false;
        let message = SignalMessage::CallResponse(CallResponse {
            call_id: session.call_id().clone(),
            caller_id: session.info.remote_user_id,
            accepted: true,
            reason: None,
        });
        self.render();
        self.emit(&message).await
    }

    async fn on_negotiated(
        &mut self,
        call_id: CallId,
        outcome: NegotiationOutcome,
    ) -> Result<(), CallError> {
        let session = matching(&mut self.session, &call_id)?;
        let desc = match outcome {
            NegotiationOutcome::LocalDescription(desc) => desc,
            NegotiationOutcome::Failed(reason) => {
                return Err(CallError::PeerConnectionFailed(reason));
            }
        };
        let payload = match desc.sdp_type {
            SdpType::Offer => SignalPayload::Offer(desc),
            SdpType::Answer => SignalPayload::Answer(desc),
            other => {
                warn!(target: "Call/Negotiation", "[{call_id}] Not sending {other} description");
                return Ok(());
            }
        };
        let signal = PeerSignal::new(
            call_id,
            self.user.id,
            session.info.remote_user_id,
            &payload,
        )?;
        self.emit(&SignalMessage::WebrtcSignal(signal)).await
    }

    async fn on_peer_event(&mut self, call_id: CallId, event: PeerEvent) -> Result<(), CallError> {
        let session = matching(&mut self.session, &call_id)?;
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let signal = PeerSignal::new(
                    call_id,
                    self.user.id,
                    session.info.remote_user_id,
                    &SignalPayload::IceCandidate(candidate),
                )?;
                self.emit_best_effort(&SignalMessage::WebrtcSignal(signal))
                    .await;
                Ok(())
            }
            PeerEvent::RemoteTrack(track) => {
                debug!(target: "Call/Controller", "[{call_id}] Remote track {}", track.id());
                session.remote_tracks.push(track);
                Ok(())
            }
            PeerEvent::StateChanged(state) if state.is_terminal() => Err(
                CallError::PeerConnectionFailed(format!("peer connection {state}")),
            ),
            PeerEvent::StateChanged(PeerConnectionState::Connected) => {
                match session.state() {
                    CallState::Connecting => {}
                    CallState::Connected => return Err(CallError::Duplicate("connected")),
                    state => return Err(invalid(state, "MediaConnected")),
                }
                session.info.apply_transition(CallTransition::MediaConnected)?;
                session.connected_at = Some(Instant::now());
                session.elapsed_ticker = Some(elapsed_ticker(
                    &self.mailbox,
                    self.config.elapsed_tick(),
                    &call_id,
                ));
                info!(target: "Call/Controller", "[{call_id}] Call connected");
                self.render();
                self.notify(Notice::success("Call connected!"));
                Ok(())
            }
            PeerEvent::StateChanged(state) => {
                debug!(target: "Call/Controller", "[{call_id}] Peer connection {state}");
                Ok(())
            }
        }
    }

    async fn on_timer(&mut self, call_id: CallId, kind: TimerKind) -> Result<(), CallError> {
        let session = matching(&mut self.session, &call_id)?;
        match (kind, session.state()) {
            (TimerKind::NoAnswer, CallState::Calling) => {
                info!(target: "Call/Controller", "[{call_id}] No answer");
                if session.request_sent {
                    let message = SignalMessage::CallEnded(CallEnded {
                        call_id,
                        target_id: Some(session.info.remote_user_id),
                        reason: Some(EndReason::NoAnswer),
                    });
                    self.emit_best_effort(&message).await;
                }
                Err(CallError::NoAnswer)
            }
            (TimerKind::Ring, CallState::Ringing) if !session.answering => {
                info!(target: "Call/Controller", "[{call_id}] Missed call");
                Err(CallError::NoAnswer)
            }
            _ => Err(CallError::StaleMessage(call_id)),
        }
    }

    // --- Helpers ---

    /// The outgoing attempt a relay notice refers to. Notices may omit the
    /// call id, in which case they apply to a call still in `Calling`.
    fn outgoing_attempt(&self, call_id: Option<&CallId>) -> Result<&CallSession, CallError> {
        let session = self.session.as_ref().filter(|s| s.info.is_initiator());
        match (session, call_id) {
            (Some(s), Some(id)) if s.call_id() == id => Ok(s),
            (Some(s), None) if s.state() == CallState::Calling => Ok(s),
            (_, Some(id)) => Err(CallError::StaleMessage(id.clone())),
            (_, None) => Err(CallError::NoActiveCall),
        }
    }

    /// Tears the session down and reports the ending exactly once.
    fn finish(&mut self, reason: EndReason) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = session
            .info
            .apply_transition(CallTransition::Terminated { reason })
        {
            debug!(target: "Call/Controller", "{e}");
        }
        let call_id = session.call_id().clone();
        let view = session.view();
        drop(session);

        info!(target: "Call/Controller", "[{call_id}] Call ended: {reason:?}");
        if self.recent.len() == RECENT_CALL_HISTORY {
            self.recent.pop_front();
        }
        self.recent.push_back(call_id);

        self.backends.presenter.render(&view);
        self.notify(Notice::for_end(reason));
        self.backends.presenter.render(&SessionView::idle());
    }

    fn view(&self) -> SessionView {
        self.session
            .as_ref()
            .map(CallSession::view)
            .unwrap_or_else(SessionView::idle)
    }

    fn render(&self) {
        self.backends.presenter.render(&self.view());
    }

    fn notify(&self, notice: Notice) {
        self.backends.presenter.notify(&notice);
    }

    async fn emit(&self, message: &SignalMessage) -> Result<(), CallError> {
        let event = message.event_name();
        if !self.backends.channel.is_connected() {
            warn!(target: "Call/Controller", "Signaling channel down, cannot send {event}");
            return Err(CallError::ChannelUnavailable);
        }
        self.backends.channel.emit(message).await.map_err(|e| {
            warn!(target: "Call/Controller", "Failed to send {event}: {e:?}");
            CallError::ChannelUnavailable
        })?;
        debug!(target: "Call/Controller", "--> {event}");
        Ok(())
    }

    async fn emit_best_effort(&self, message: &SignalMessage) {
        if let Err(e) = self.emit(message).await {
            debug!(target: "Call/Controller", "Best-effort {} not sent: {e}", message.event_name());
        }
    }

    fn acquire_media(&self, call_id: &CallId) {
        let media = self.backends.media.clone();
        let mailbox = self.mailbox.clone();
        let call_id = call_id.clone();
        tokio::spawn(async move {
            let result = media.acquire_audio().await;
            let command = CallCommand::MediaAcquired { call_id, result };
            let undelivered = match mailbox.upgrade() {
                Some(tx) => tx.send(command).await.err().map(|e| e.0),
                None => Some(command),
            };
            // Nobody will own the stream; release the microphone here.
            if let Some(CallCommand::MediaAcquired {
                result: Ok(stream), ..
            }) = undelivered
            {
                stream.stop();
            }
        });
    }

    fn arm_timer(&self, call_id: &CallId, kind: TimerKind, after: Duration) -> ScopedTask {
        let mailbox = self.mailbox.clone();
        let call_id = call_id.clone();
        ScopedTask::delay(after, async move {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(CallCommand::TimerFired { call_id, kind }).await;
            }
        })
    }
}

fn matching<'a>(
    slot: &'a mut Option<CallSession>,
    call_id: &CallId,
) -> Result<&'a mut CallSession, CallError> {
    match slot {
        Some(session) if session.call_id() == call_id => Ok(session),
        _ => Err(CallError::StaleMessage(call_id.clone())),
    }
}

fn invalid(state: CallState, attempted: &str) -> CallError {
    CallError::InvalidTransition(InvalidTransition {
        current_state: state,
        attempted: attempted.to_string(),
    })
}

fn elapsed_ticker(
    mailbox: &mpsc::WeakSender<CallCommand>,
    period: Duration,
    call_id: &CallId,
) -> ScopedTask {
    let mailbox = mailbox.clone();
    let call_id = call_id.clone();
    ScopedTask::interval(period, move || match mailbox.upgrade() {
        Some(tx) => {
            // A full mailbox just skips one refresh.
            let _ = tx.try_send(CallCommand::Tick {
                call_id: call_id.clone(),
            });
            true
        }
        None => false,
    })
}
