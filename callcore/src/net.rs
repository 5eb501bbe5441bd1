use async_trait::async_trait;

use crate::protocol::SignalMessage;

/// Outbound half of the shared socket, as seen by the call module.
///
/// Inbound frames reach the call module through whatever event dispatch the
/// transport provides; the channel carries other chat traffic as well.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Whether the underlying connection is currently up.
    fn is_connected(&self) -> bool;

    /// Sends one message. Delivery is at-least-once once this returns `Ok`.
    async fn emit(&self, message: &SignalMessage) -> Result<(), anyhow::Error>;
}
