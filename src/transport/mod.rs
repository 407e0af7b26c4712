//! The `transport` module is responsible for moving protocol messages over a
//! non-blocking socket.
//!
//! It defines the message model and its wire codec, the frame assembler that
//! turns a byte stream into frames, the channel that tracks delivery and
//! acknowledgments, and a mio-driven server loop that hosts broker channels.

pub mod channel;
pub mod codec;
pub mod frame;
pub mod handler;
pub mod housekeeping;
pub mod message;
pub mod server;
pub mod socket;

pub use channel::{Channel, ChannelHandle, ChannelState};
pub use handler::MessageHandler;
pub use message::{ConnectReturnCode, Message, MessageType, QoS};
pub use socket::Socket;

#[cfg(test)]
pub(crate) mod testing;
