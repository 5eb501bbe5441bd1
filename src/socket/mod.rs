pub mod error;
pub mod frame;
pub mod websocket;

pub use error::{Result, SocketError};
pub use frame::EventFrame;
pub use websocket::{SocketChannel, SocketReader};
