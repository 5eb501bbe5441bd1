//! Runtime-agnostic core of the call client: identifiers, the signaling
//! message set, and the contracts for the signaling channel, local media and
//! peer connections.

pub mod media;
pub mod net;
pub mod protocol;
pub mod types;
