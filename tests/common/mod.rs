#![allow(dead_code)]

use parley::calls::{CallManager, LocalUser, Notice, PresenterEvent};
use parley::config::CallConfig;
use parley::loopback::{LoopbackChannel, LoopbackClient, LoopbackInbox, LoopbackRelay};
use parley::protocol::{PeerSignal, SignalMessage, SignalPayload};
use parley::types::{CallState, EndReason, SessionView, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub const ALICE: UserId = UserId(1);
pub const BOB: UserId = UserId(2);
pub const CAROL: UserId = UserId(3);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn join(relay: &Arc<LoopbackRelay>, id: UserId, name: &str) -> LoopbackClient {
    relay.join(LocalUser::new(id, name), CallConfig::default())
}

/// A user on the relay with no controller behind it; the test speaks for it.
pub fn scripted(
    relay: &Arc<LoopbackRelay>,
    id: UserId,
    name: &str,
) -> (Arc<LoopbackChannel>, LoopbackInbox) {
    relay.channel(&LocalUser::new(id, name))
}

pub async fn wait_for_state(manager: &CallManager, state: CallState) -> SessionView {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let view = manager.snapshot().await.expect("controller running");
        if view.state == state {
            return view;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {state}, still {}",
            view.state
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next message for a scripted user, failing the test after five seconds.
pub async fn expect_message(inbox: &mut LoopbackInbox) -> SignalMessage {
    tokio::time::timeout(Duration::from_secs(5), inbox.next_message())
        .await
        .expect("message within 5s")
        .expect("relay still running")
}

/// Skips messages until one matches.
pub async fn expect_event(inbox: &mut LoopbackInbox, event: &str) -> SignalMessage {
    loop {
        let message = expect_message(inbox).await;
        if message.event_name() == event {
            return message;
        }
    }
}

/// Skips candidates and other messages until an offer arrives.
pub async fn expect_offer(inbox: &mut LoopbackInbox) -> PeerSignal {
    loop {
        if let SignalMessage::WebrtcSignal(signal) =
            expect_event(inbox, SignalMessage::WEBRTC_SIGNAL).await
        {
            if let Ok(SignalPayload::Offer(_)) = signal.payload() {
                return signal;
            }
        }
    }
}

pub fn drain(events: &mut broadcast::Receiver<PresenterEvent>) -> Vec<PresenterEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn end_reasons(events: &[PresenterEvent]) -> Vec<EndReason> {
    events
        .iter()
        .filter_map(|e| match e {
            PresenterEvent::Render(view) if view.state == CallState::Ended => view.end_reason,
            _ => None,
        })
        .collect()
}

pub fn notices(events: &[PresenterEvent]) -> Vec<Notice> {
    events
        .iter()
        .filter_map(|e| match e {
            PresenterEvent::Notice(notice) => Some(notice.clone()),
            _ => None,
        })
        .collect()
}

pub fn sent_events(relay: &LoopbackRelay, user: UserId) -> Vec<&'static str> {
    relay
        .sent_by(user)
        .iter()
        .map(SignalMessage::event_name)
        .collect()
}

/// Places a call from `caller` to `callee`, answers it and waits until both
/// sides are connected.
pub async fn connect(caller: &LoopbackClient, callee: &LoopbackClient) -> parley::types::CallId {
    let call_id = caller
        .manager
        .place_call(callee.user.id, Some(callee.user.username.clone()))
        .await
        .expect("call placed");
    wait_for_state(&callee.manager, CallState::Ringing).await;
    callee.manager.accept(&call_id).await.expect("accepted");
    wait_for_state(&caller.manager, CallState::Connected).await;
    wait_for_state(&callee.manager, CallState::Connected).await;
    call_id
}
