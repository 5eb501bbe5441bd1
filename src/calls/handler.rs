//! Socket event handler for call signaling.

use super::manager::CallManager;
use crate::handlers::traits::EventHandler;
use async_trait::async_trait;
use callcore::protocol::SignalMessage;
use log::{debug, warn};
use serde_json::Value;

/// Parses call events off the shared socket and feeds them to a
/// [`CallManager`].
#[derive(Clone, Debug)]
pub struct CallHandler {
    manager: CallManager,
}

impl CallHandler {
    pub fn new(manager: CallManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for CallHandler {
    fn events(&self) -> &'static [&'static str] {
        &SignalMessage::EVENT_NAMES
    }

    async fn handle(&self, event: &str, data: Value) -> bool {
        let message = match SignalMessage::from_event(event, data) {
            Ok(message) => message,
            Err(e) => {
                warn!(target: "Call/Handler", "Dropping {event}: {e}");
                return false;
            }
        };

        debug!(
            target: "Call/Handler",
            "Received {event} (call_id: {})",
            message.call_id().map(|id| id.as_str()).unwrap_or("-")
        );

        match self.manager.deliver(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "Call/Handler", "Failed to deliver {event}: {e}");
                false
            }
        }
    }
}
