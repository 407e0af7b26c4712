//! The `command` module provides the completion handle callers use to learn
//! the outcome of an asynchronous send.
//!
//! What "complete" means depends on the message: a CONNECT completes when the
//! CONNACK arrives, an acknowledged message when its ack arrives, anything
//! else once it has been written to the socket. Closing a channel fails every
//! handle still pending on it.

pub mod completion;
pub use completion::{Completion, Outcome};

#[cfg(test)]
mod tests;
