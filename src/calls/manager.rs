//! Cloneable handle to a running call controller.

use super::controller::{CallBackends, CallSessionController, LocalUser};
use super::error::CallError;
use super::messages::{CallCommand, Reply};
use crate::config::CallConfig;
use callcore::protocol::SignalMessage;
use callcore::types::{CallId, SessionView, UserId};
use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Entry point for user intents and inbound signaling.
///
/// All methods forward to the controller task and wait for it to apply the
/// command, so the returned result reflects the state right after the
/// transition.
#[derive(Clone, Debug)]
pub struct CallManager {
    tx: mpsc::Sender<CallCommand>,
}

impl CallManager {
    /// Starts a controller task and returns its handle.
    ///
    /// The controller stops once every handle has been dropped or
    /// [`shutdown`](Self::shutdown) is called.
    pub fn spawn(user: LocalUser, config: CallConfig, backends: CallBackends) -> Self {
        Self::spawn_with_handle(user, config, backends).0
    }

    pub fn spawn_with_handle(
        user: LocalUser,
        config: CallConfig,
        backends: CallBackends,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let controller = CallSessionController::new(user, config, backends, rx, tx.downgrade());
        let handle = tokio::spawn(controller.run());
        (Self { tx }, handle)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> CallCommand,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CallError::ControllerClosed)?;
        rx.await.map_err(|_| CallError::ControllerClosed)?
    }

    /// Calls `remote_id`. Returns the new call's id once it is in `Calling`.
    pub async fn place_call(
        &self,
        remote_id: UserId,
        display_name: Option<String>,
    ) -> Result<CallId, CallError> {
        self.request(|reply| CallCommand::PlaceCall {
            remote_id,
            display_name,
            reply,
        })
        .await
    }

    pub async fn accept(&self, call_id: &CallId) -> Result<(), CallError> {
        let call_id = call_id.clone();
        self.request(|reply| CallCommand::Accept { call_id, reply })
            .await
    }

    pub async fn reject(&self, call_id: &CallId) -> Result<(), CallError> {
        let call_id = call_id.clone();
        self.request(|reply| CallCommand::Reject { call_id, reply })
            .await
    }

    /// Ends the current call. While ringing this declines it.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::HangUp { reply }).await
    }

    /// Returns the new mute state.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleMute { reply })
            .await
    }

    /// Hands an inbound signaling message to the controller.
    pub async fn deliver(&self, message: SignalMessage) -> Result<(), CallError> {
        self.tx
            .send(CallCommand::Inbound(message))
            .await
            .map_err(|_| CallError::ControllerClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionView, CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CallCommand::Snapshot { reply })
            .await
            .map_err(|_| CallError::ControllerClosed)?;
        rx.await.map_err(|_| CallError::ControllerClosed)
    }

    pub async fn shutdown(&self) {
        if self.tx.send(CallCommand::Shutdown).await.is_err() {
            debug!(target: "Call/Controller", "Controller already stopped");
        }
    }
}
