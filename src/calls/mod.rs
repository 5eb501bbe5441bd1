//! One-to-one voice calls on top of the chat signaling channel.
//!
//! # Architecture
//!
//! - [`CallManager`]: cloneable handle for user intents and inbound messages
//! - [`CallSessionController`]: actor owning the single [`CallSession`]
//! - [`CallInfo`] & [`CallTransition`]: call state machine
//! - [`NegotiationQueue`]: ordered offer/answer/candidate application
//! - [`ScopedTask`]: abort-on-drop timers
//! - [`CallPresenter`]: rendering contract for the UI
//! - [`CallHandler`]: [`EventHandler`](crate::handlers::EventHandler) for call events
//!
//! # Flow
//!
//! The caller sends `call_request` once its microphone is ready and waits in
//! `Calling`. The callee rings, accepts, and answers with `call_response`.
//! After that the caller creates the offer, the callee answers, and both sides
//! trade ICE candidates over `webrtc_signal` until the peer connection reports
//! `connected`.

mod controller;
mod error;
mod handler;
mod manager;
mod messages;
mod negotiation;
mod presenter;
mod session;
mod state;
mod timer;

pub use controller::{CallBackends, CallSessionController, LocalUser};
pub use error::CallError;
pub use handler::CallHandler;
pub use manager::CallManager;
pub use messages::{CallCommand, NegotiationOutcome, TimerKind};
pub use negotiation::{NegotiationQueue, PeerOp};
pub use presenter::{BroadcastPresenter, CallPresenter, Notice, NoticeKind, PresenterEvent};
pub use session::CallSession;
pub use state::{CallInfo, CallTransition, InvalidTransition};
pub use timer::ScopedTask;
