use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::client::Client;
use crate::transport::message::{Message, QoS};

use crate::transport::message::QoS::{AtLeastOnce, AtMostOnce, ExactlyOnce};

/// How a message reaches one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub qos: QoS,
    /// The copy needs an identifier scoped to the subscriber's channel.
    pub mint_id: bool,
}

const fn at(qos: QoS) -> Delivery {
    Delivery {
        qos,
        mint_id: !matches!(qos, AtMostOnce),
    }
}

/// Indexed by `[published][subscribed]`.
const DELIVERY: [[Delivery; 3]; 3] = [
    [at(AtMostOnce), at(AtMostOnce), at(AtMostOnce)],
    [at(AtMostOnce), at(AtLeastOnce), at(AtLeastOnce)],
    [at(AtMostOnce), at(AtLeastOnce), at(ExactlyOnce)],
];

/// How a message published at `published` is delivered to a subscription
/// made at `subscribed`: never above either QoS, with a fresh identifier
/// whenever the copy is acknowledged.
pub fn delivery(published: QoS, subscribed: QoS) -> Delivery {
    DELIVERY[published.value() as usize][subscribed.value() as usize]
}

/// A client's subscription to one topic.
///
/// Messages delivered with QoS > 0 stay queued until the subscriber
/// acknowledges them, and are sent again when the client reconnects.
#[derive(Debug)]
pub struct Subscription {
    pub client_id: String,
    pub qos: QoS,
    queue: VecDeque<Message>,
}

impl Subscription {
    pub fn new(client_id: impl Into<String>, qos: QoS) -> Self {
        Self {
            client_id: client_id.into(),
            qos,
            queue: VecDeque::new(),
        }
    }

    /// Messages waiting for the subscriber's acknowledgment.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Delivers a published message, to `client` if it is connected.
    pub fn publish(&mut self, message: &Message, client: Option<&Client>) {
        let route = delivery(message.qos, self.qos);
        let mut outgoing = message.with_qos(route.qos);
        if let Some(client) = client {
            deliver(client, &mut outgoing, route.mint_id);
        }
        if route.mint_id {
            self.queue.push_back(outgoing);
        }
    }

    /// Replays every unacknowledged message to a reconnected client.
    pub fn connected(&mut self, client: &Client) {
        if !self.queue.is_empty() {
            debug!(client = %client.id, count = self.queue.len(), "replaying queued messages");
        }
        for message in self.queue.iter_mut() {
            deliver(client, message, true);
        }
    }

    /// Drops the queued message the subscriber acknowledged.
    ///
    /// Returns true if a message with identifier `id` was queued.
    pub fn pub_acked(&mut self, id: u16) -> bool {
        match self.queue.iter().position(|m| m.message_id == Some(id)) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Sends `message` to `client`, first giving it an identifier from the
/// client's channel if `mint_id`.
fn deliver(client: &Client, message: &mut Message, mint_id: bool) {
    if mint_id {
        match client.next_message_id() {
            Ok(id) => message.message_id = Some(id),
            Err(e) => {
                warn!(client = %client.id, error = %e, "cannot deliver");
                return;
            }
        }
    }
    if let Err(e) = client.send(message.clone()) {
        debug!(client = %client.id, error = %e, "delivery failed");
    }
}
