//! The `broker` module is a small in-memory MQTT broker that sits on top of
//! the channel core.
//!
//! It keeps exact-match topics, the clients currently connected, and per
//! subscription queues of messages the subscriber has not acknowledged yet.

pub mod engine;
pub mod subscription;
pub mod topic;

pub use engine::Broker;
pub use subscription::{Delivery, Subscription, delivery};

#[cfg(test)]
mod tests;
