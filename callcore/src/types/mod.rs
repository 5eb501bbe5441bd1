pub mod call;

pub use call::{CallDirection, CallId, CallState, EndReason, SessionView, UserId};
