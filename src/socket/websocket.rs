use super::error::{Result, SocketError};
use super::frame::EventFrame;
use crate::handlers::EventRouter;
use async_trait::async_trait;
use callcore::net::SignalingChannel;
use callcore::protocol::SignalMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Signaling channel over a WebSocket carrying JSON [`EventFrame`]s.
pub struct SocketChannel {
    ws_sink: Mutex<Option<WsSink>>,
    is_connected: Arc<AtomicBool>,
}

/// Read half of a [`SocketChannel`], returned by
/// [`connect`](SocketChannel::connect) so the event router can be built after
/// the channel exists.
pub struct SocketReader {
    stream: WsStream,
    is_connected: Arc<AtomicBool>,
}

impl SocketChannel {
    pub async fn connect(url: &str) -> Result<(Arc<Self>, SocketReader)> {
        info!(target: "Socket", "Dialing {url}");
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        let (sink, stream) = ws.split();
        let is_connected = Arc::new(AtomicBool::new(true));

        let channel = Arc::new(Self {
            ws_sink: Mutex::new(Some(sink)),
            is_connected: is_connected.clone(),
        });
        Ok((
            channel,
            SocketReader {
                stream,
                is_connected,
            },
        ))
    }

    pub async fn send_event(&self, event: &str, data: Value) -> Result<()> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(SocketError::SocketClosed)?;

        let text = EventFrame::new(event, data).encode()?;
        debug!(target: "Socket", "--> {event} ({} bytes)", text.len());
        sink.send(Message::text(text)).await?;
        Ok(())
    }

    pub async fn close(&self) {
        if self.is_connected.swap(false, Ordering::SeqCst) {
            let sink = self.ws_sink.lock().await.take();
            if let Some(mut sink) = sink {
                if let Err(e) = sink.close().await {
                    debug!(target: "Socket", "Error closing websocket: {e}");
                }
            }
            info!(target: "Socket", "Socket closed");
        }
    }
}

#[async_trait]
impl SignalingChannel for SocketChannel {
    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, message: &SignalMessage) -> std::result::Result<(), anyhow::Error> {
        let (event, data) = message.to_event()?;
        self.send_event(event, data).await?;
        Ok(())
    }
}

impl SocketReader {
    /// Spawns the read pump. Frames are dispatched to `router` in order; the
    /// channel reports disconnected once the pump exits.
    pub fn spawn(self, router: Arc<EventRouter>) -> JoinHandle<()> {
        tokio::spawn(self.read_pump(router))
    }

    async fn read_pump(mut self, router: Arc<EventRouter>) {
        let is_connected = self.is_connected.clone();
        let _guard = scopeguard::guard((), move |_| {
            is_connected.store(false, Ordering::SeqCst);
        });

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame = match EventFrame::decode(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(target: "Socket", "Dropping undecodable frame: {e}");
                            continue;
                        }
                    };
                    trace!(target: "Socket", "<-- {}", frame.event);
                    router.dispatch(&frame.event, frame.data).await;
                }
                Some(Ok(Message::Close(_))) => {
                    trace!(target: "Socket", "Received close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(target: "Socket", "Error reading from websocket: {e}");
                    break;
                }
                None => {
                    trace!(target: "Socket", "Websocket stream ended");
                    break;
                }
            }
        }
        info!(target: "Socket", "Read pump stopped");
    }
}
