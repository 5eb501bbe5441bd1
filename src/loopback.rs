//! In-process stand-ins for the relay server, the microphone and the peer
//! connection.
//!
//! [`LoopbackRelay`] routes call events between clients the way the chat
//! server does; every client still goes through [`EventFrame`]s and an
//! [`EventRouter`], so the same handler code runs as with a real socket.

use crate::calls::{BroadcastPresenter, CallBackends, CallHandler, CallManager, LocalUser};
use crate::config::CallConfig;
use crate::handlers::EventRouter;
use crate::socket::EventFrame;
use async_trait::async_trait;
use callcore::media::{
    IceServer, LocalStream, MediaError, MediaSource, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerConnectionState, PeerError, PeerEvent, TrackKind,
};
use callcore::net::SignalingChannel;
use callcore::protocol::{
    CallAccepted, CallRejected, CallUnavailable, IceCandidate, SdpType, SessionDescription,
    SignalMessage,
};
use callcore::types::{EndReason, UserId};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

// --- Relay ---

/// A message as received by the relay, before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Relayed {
    pub from: UserId,
    pub message: SignalMessage,
}

struct Registration {
    username: String,
    inbox: mpsc::UnboundedSender<EventFrame>,
}

#[derive(Default)]
pub struct LoopbackRelay {
    clients: DashMap<UserId, Registration>,
    log: Mutex<Vec<Relayed>>,
}

impl LoopbackRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `user` and returns its channel plus the inbox to pump.
    pub fn channel(self: &Arc<Self>, user: &LocalUser) -> (Arc<LoopbackChannel>, LoopbackInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(LoopbackChannel {
            user: user.clone(),
            relay: self.clone(),
            inbox: tx,
            online: AtomicBool::new(false),
        });
        channel.set_online(true);
        (channel, LoopbackInbox { rx })
    }

    /// Builds a complete client: channel, loopback media and peers, a
    /// broadcast presenter and a running controller wired to the router.
    pub fn join(self: &Arc<Self>, user: LocalUser, config: CallConfig) -> LoopbackClient {
        let (channel, inbox) = self.channel(&user);
        let media = Arc::new(LoopbackMedia::new());
        let peers = Arc::new(LoopbackPeerFactory::new());
        let presenter = Arc::new(BroadcastPresenter::default());
        let manager = CallManager::spawn(
            user.clone(),
            config,
            CallBackends {
                channel: channel.clone(),
                media: media.clone(),
                peers: peers.clone(),
                presenter: presenter.clone(),
            },
        );

        let mut router = EventRouter::new();
        router.register(Arc::new(CallHandler::new(manager.clone())));
        let pump = inbox.spawn(Arc::new(router));

        LoopbackClient {
            user,
            manager,
            channel,
            media,
            peers,
            presenter,
            pump,
        }
    }

    /// Everything the relay received so far, in order.
    pub fn sent(&self) -> Vec<Relayed> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn sent_by(&self, user: UserId) -> Vec<SignalMessage> {
        self.sent()
            .into_iter()
            .filter(|r| r.from == user)
            .map(|r| r.message)
            .collect()
    }

    fn route(&self, from: UserId, message: SignalMessage) {
        if let Ok(mut log) = self.log.lock() {
            log.push(Relayed {
                from,
                message: message.clone(),
            });
        }

        match message {
            SignalMessage::CallRequest(mut request) => {
                request.caller_id = from;
                let callee = request.callee_id;
                if !self.deliver(callee, SignalMessage::CallRequest(request.clone())) {
                    info!(target: "Loopback", "User {callee} not online for call from {from}");
                    self.deliver(
                        from,
                        SignalMessage::CallUnavailable(CallUnavailable {
                            callee_id: callee,
                            call_id: Some(request.call_id),
                        }),
                    );
                }
            }
            SignalMessage::CallResponse(response) => {
                let relayed = if response.accepted {
                    SignalMessage::CallAccepted(CallAccepted {
                        call_id: response.call_id,
                        callee_id: Some(from),
                        callee_username: self.clients.get(&from).map(|r| r.username.clone()),
                    })
                } else {
                    SignalMessage::CallRejected(CallRejected {
                        call_id: response.call_id,
                        caller_id: Some(response.caller_id),
                        reason: response.reason.unwrap_or(EndReason::Rejected),
                    })
                };
                self.deliver(response.caller_id, relayed);
            }
            SignalMessage::CallRejected(rejected) => match rejected.caller_id {
                Some(caller) => {
                    self.deliver(caller, SignalMessage::CallRejected(rejected));
                }
                None => warn!(target: "Loopback", "call_rejected from {from} without caller_id"),
            },
            SignalMessage::WebrtcSignal(mut signal) => {
                signal.sender_id = Some(from);
                let target = signal.target_id;
                self.deliver(target, SignalMessage::WebrtcSignal(signal));
            }
            SignalMessage::CallEnded(ended) => match ended.target_id {
                Some(target) => {
                    self.deliver(target, SignalMessage::CallEnded(ended));
                }
                None => warn!(target: "Loopback", "call_ended from {from} without target_id"),
            },
            other @ (SignalMessage::CallAccepted(_)
            | SignalMessage::CallUnavailable(_)
            | SignalMessage::CallError(_)) => {
                warn!(
                    target: "Loopback",
                    "Client {from} sent server-only event {}", other.event_name()
                );
            }
        }
    }

    fn deliver(&self, to: UserId, message: SignalMessage) -> bool {
        let Some(registration) = self.clients.get(&to) else {
            debug!(target: "Loopback", "Dropping {} for offline user {to}", message.event_name());
            return false;
        };
        match message.to_event() {
            Ok((event, data)) => registration.inbox.send(EventFrame::new(event, data)).is_ok(),
            Err(e) => {
                warn!(target: "Loopback", "Failed to encode {}: {e}", message.event_name());
                false
            }
        }
    }
}

/// A client's connection to the [`LoopbackRelay`].
pub struct LoopbackChannel {
    user: LocalUser,
    relay: Arc<LoopbackRelay>,
    inbox: mpsc::UnboundedSender<EventFrame>,
    online: AtomicBool,
}

impl LoopbackChannel {
    /// Going offline unregisters the user, so calls to it become unavailable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if online {
            self.relay.clients.insert(
                self.user.id,
                Registration {
                    username: self.user.username.clone(),
                    inbox: self.inbox.clone(),
                },
            );
        } else {
            self.relay.clients.remove(&self.user.id);
        }
    }
}

#[async_trait]
impl SignalingChannel for LoopbackChannel {
    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn emit(&self, message: &SignalMessage) -> Result<(), anyhow::Error> {
        if !self.is_connected() {
            return Err(anyhow::anyhow!("user {} is offline", self.user.id));
        }
        self.relay.route(self.user.id, message.clone());
        Ok(())
    }
}

pub struct LoopbackInbox {
    rx: mpsc::UnboundedReceiver<EventFrame>,
}

impl LoopbackInbox {
    /// Next call message delivered to this user, for driving a client by hand.
    pub async fn next_message(&mut self) -> Option<SignalMessage> {
        while let Some(frame) = self.rx.recv().await {
            match SignalMessage::from_event(&frame.event, frame.data) {
                Ok(message) => return Some(message),
                Err(e) => warn!(target: "Loopback", "Skipping {}: {e}", frame.event),
            }
        }
        None
    }

    /// Like [`next_message`](Self::next_message) but never waits.
    pub fn try_next_message(&mut self) -> Option<SignalMessage> {
        while let Ok(frame) = self.rx.try_recv() {
            if let Ok(message) = SignalMessage::from_event(&frame.event, frame.data) {
                return Some(message);
            }
        }
        None
    }

    pub fn spawn(mut self, router: Arc<EventRouter>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = self.rx.recv().await {
                router.dispatch(&frame.event, frame.data).await;
            }
        })
    }
}

/// Everything belonging to one user on the loopback relay.
pub struct LoopbackClient {
    pub user: LocalUser,
    pub manager: CallManager,
    pub channel: Arc<LoopbackChannel>,
    pub media: Arc<LoopbackMedia>,
    pub peers: Arc<LoopbackPeerFactory>,
    pub presenter: Arc<BroadcastPresenter>,
    pump: JoinHandle<()>,
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

// --- Media ---

#[derive(Debug)]
pub struct LoopbackTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LoopbackTrack {
    pub fn audio(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind: TrackKind::Audio,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct LoopbackStream {
    id: String,
    audio: Arc<LoopbackTrack>,
}

impl LoopbackStream {
    pub fn microphone(&self) -> &Arc<LoopbackTrack> {
        &self.audio
    }

    pub fn is_stopped(&self) -> bool {
        self.audio.is_stopped()
    }
}

impl LocalStream for LoopbackStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![self.audio.clone()]
    }
}

/// Microphone that can be told to refuse or to take its time.
#[derive(Default)]
pub struct LoopbackMedia {
    deny: AtomicBool,
    delay: Mutex<Option<Duration>>,
    acquired: Mutex<Vec<Arc<LoopbackStream>>>,
}

impl LoopbackMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = delay;
        }
    }

    /// Streams handed out so far, oldest first.
    pub fn streams(&self) -> Vec<Arc<LoopbackStream>> {
        self.acquired
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MediaSource for LoopbackMedia {
    async fn acquire_audio(&self) -> Result<Arc<dyn LocalStream>, MediaError> {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("Permission denied".into()));
        }
        let n = next_id();
        let stream = Arc::new(LoopbackStream {
            id: format!("stream-{n}"),
            audio: LoopbackTrack::audio(format!("mic-{n}")),
        });
        if let Ok(mut acquired) = self.acquired.lock() {
            acquired.push(stream.clone());
        }
        Ok(stream)
    }
}

// --- Peer connection ---

/// Peer connection that negotiates with itself.
///
/// Gathers one host candidate after the local description is set, delivers a
/// remote track when the remote description is set, and reports `connected`
/// once both are in place. Like a browser, it refuses candidates before a
/// remote description exists.
pub struct LoopbackPeer {
    id: u64,
    ice_servers: Vec<IceServer>,
    events: mpsc::UnboundedSender<PeerEvent>,
    auto_connect: bool,
    ops: Mutex<Vec<String>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackPeer {
    fn record(&self, op: impl Into<String>) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op.into());
        }
    }

    /// Operations applied so far, e.g. `["add_track", "create_offer", "set_local:offer"]`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.candidates
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn local_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reports a connection state as the network would.
    pub fn report(&self, state: PeerConnectionState) {
        let _ = self.events.send(PeerEvent::StateChanged(state));
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.is_closed() {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }

    fn maybe_connect(&self) {
        let both = self.local.lock().map(|l| l.is_some()).unwrap_or(false)
            && self.remote.lock().map(|r| r.is_some()).unwrap_or(false);
        if self.auto_connect && both && !self.connected.swap(true, Ordering::SeqCst) {
            self.report(PeerConnectionState::Connecting);
            self.report(PeerConnectionState::Connected);
        }
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record("add_track");
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.push(track);
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.record("create_offer");
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        let has_remote = self.remote.lock().map(|r| r.is_some()).unwrap_or(false);
        if !has_remote {
            return Err(PeerError::InvalidDescription(
                "cannot answer without a remote offer".into(),
            ));
        }
        self.record("create_answer");
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(format!("set_local:{}", desc.sdp_type));
        if let Ok(mut local) = self.local.lock() {
            *local = Some(desc);
        }
        let candidate = IceCandidate::new(format!(
            "candidate:{} 1 UDP 2130706431 127.0.0.1 {} typ host",
            self.id,
            40000 + self.id % 1000
        ))
        .with_sdp_mid("0")
        .with_sdp_m_line_index(0);
        let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        if desc.sdp_type != SdpType::Offer && desc.sdp_type != SdpType::Answer {
            return Err(PeerError::InvalidDescription(desc.sdp_type.to_string()));
        }
        self.record(format!("set_remote:{}", desc.sdp_type));
        if let Ok(mut remote) = self.remote.lock() {
            *remote = Some(desc);
        }
        let track: Arc<dyn MediaTrack> = LoopbackTrack::audio(format!("remote-{}", self.id));
        let _ = self.events.send(PeerEvent::RemoteTrack(track));
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        let has_remote = self.remote.lock().map(|r| r.is_some()).unwrap_or(false);
        if !has_remote {
            self.record("add_candidate:rejected");
            return Err(PeerError::Candidate(
                "remote description is not set".into(),
            ));
        }
        self.record("add_candidate");
        if let Ok(mut candidates) = self.candidates.lock() {
            candidates.push(candidate);
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record("close");
        }
    }
}

pub struct LoopbackPeerFactory {
    auto_connect: AtomicBool,
    created: Mutex<Vec<Arc<LoopbackPeer>>>,
}

impl LoopbackPeerFactory {
    pub fn new() -> Self {
        Self {
            auto_connect: AtomicBool::new(true),
            created: Mutex::new(Vec::new()),
        }
    }

    /// When off, new peers never report `connected` on their own; use
    /// [`LoopbackPeer::report`].
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<Arc<LoopbackPeer>> {
        self.created.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Arc<LoopbackPeer>> {
        self.peers().pop()
    }
}

impl Default for LoopbackPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerConnectionFactory for LoopbackPeerFactory {
    fn create(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = Arc::new(LoopbackPeer {
            id: next_id(),
            ice_servers: ice_servers.to_vec(),
            events,
            auto_connect: self.auto_connect.load(Ordering::SeqCst),
            ops: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        if let Ok(mut created) = self.created.lock() {
            created.push(peer.clone());
        }
        Ok(peer)
    }
}
