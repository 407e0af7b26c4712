//! # mqttchannel
//!
//! `mqttchannel` is the transport engine of an MQTT client or broker: a
//! non-blocking channel that carries protocol messages over one socket,
//! tracks QoS 1/2 acknowledgments, resends what was not acknowledged,
//! probes idle connections and detects dead ones. The caller owns the event
//! loop and drives each channel through `read`, `write` and `house_keeping`.
//!
//! ## Core Modules
//!
//! - `transport`: The channel, the wire codec, the socket abstraction and a mio server loop.
//! - `command`: Completion handles callers block on (or `.await`) until a sent message completes.
//! - `broker`: A small in-memory broker that routes publishes between channels.
//! - `client`: The broker's view of a connected client.
//! - `config`: Loads server, channel and logging settings.
//! - `utils`: Error types and logging bootstrap.

pub mod broker;
pub mod client;
pub mod command;
pub mod config;
pub mod transport;
pub mod utils;
