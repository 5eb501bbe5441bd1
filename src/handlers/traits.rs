use async_trait::async_trait;
use serde_json::Value;

/// Trait for handling named events received on the signaling socket.
///
/// The socket is shared by the whole chat client, so each handler declares the
/// event names it owns and the router only hands it those. Adding a new event
/// family means registering another handler, not touching the socket code.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event names this handler is responsible for (e.g. `"call_request"`).
    fn events(&self) -> &'static [&'static str];

    /// Asynchronously handle one event.
    ///
    /// # Returns
    /// Returns `true` if the event was handled, `false` if it was dropped
    /// (malformed payload, receiver gone).
    async fn handle(&self, event: &str, data: Value) -> bool;
}
