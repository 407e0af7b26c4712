//! The `client` module defines the broker-side representation of a client.
//!
//! It provides the `Client` struct, which pairs the client identifier with the
//! handle of the channel the client is connected through.

pub mod pubsub_client;
pub use pubsub_client::Client;
