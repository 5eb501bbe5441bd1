// Re-export core modules so callers only need this crate
pub use callcore::{media, net, protocol, types};

pub mod calls;
pub mod config;
pub mod handlers;
pub mod socket;

// In-process relay, microphone and peer connection
pub mod loopback;
