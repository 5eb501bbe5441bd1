mod common;

use common::*;
use futures_util::{SinkExt, StreamExt};
use parley::calls::{BroadcastPresenter, CallBackends, CallHandler, CallManager, LocalUser};
use parley::config::CallConfig;
use parley::handlers::EventRouter;
use parley::loopback::{LoopbackMedia, LoopbackPeerFactory};
use parley::net::SignalingChannel;
use parley::socket::{EventFrame, SocketChannel};
use parley::types::CallState;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_call_events_round_trip_over_websocket() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // Unrelated chat traffic shares the socket.
        let chat = EventFrame::new("chat_message", json!({"text": "hi"}));
        ws.send(Message::text(chat.encode().unwrap())).await.unwrap();

        let request = EventFrame::new(
            "call_request",
            json!({
                "call_id": "C0FFEE",
                "caller_id": 1,
                "caller_username": "alice",
                "callee_id": 2
            }),
        );
        ws.send(Message::text(request.encode().unwrap()))
            .await
            .unwrap();

        let reply = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break EventFrame::decode(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended early: {other:?}"),
            }
        };
        ws.close(None).await.unwrap();
        reply
    });

    let (channel, reader) = SocketChannel::connect(&format!("ws://{addr}"))
        .await
        .unwrap();
    assert!(channel.is_connected());

    let manager = CallManager::spawn(
        LocalUser::new(BOB, "bob"),
        CallConfig::default(),
        CallBackends {
            channel: channel.clone(),
            media: Arc::new(LoopbackMedia::new()),
            peers: Arc::new(LoopbackPeerFactory::new()),
            presenter: Arc::new(BroadcastPresenter::default()),
        },
    );
    let mut router = EventRouter::new();
    router.register(Arc::new(CallHandler::new(manager.clone())));
    let _pump = reader.spawn(Arc::new(router));

    let ringing = wait_for_state(&manager, CallState::Ringing).await;
    assert_eq!(ringing.display_name(), "alice");
    let call_id = ringing.call_id.unwrap();
    assert_eq!(call_id.as_str(), "C0FFEE");
    manager.accept(&call_id).await.unwrap();

    let reply = server.await.unwrap();
    assert_eq!(reply.event, "call_response");
    assert_eq!(reply.data["call_id"], "C0FFEE");
    assert_eq!(reply.data["caller_id"], 1);
    assert_eq!(reply.data["accepted"], true);

    let probe = channel.clone();
    wait_until(move || !probe.is_connected(), "socket reports closed").await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(
        SocketChannel::connect(&format!("ws://{addr}"))
            .await
            .is_err()
    );
}
