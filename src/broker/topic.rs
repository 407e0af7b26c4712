use std::collections::HashMap;

use crate::broker::subscription::Subscription;
use crate::client::Client;
use crate::transport::message::{Message, QoS};

pub type SubscriberId = String;

/// Represents a topic in the broker system
/// Contains a name and the subscriptions made to it, keyed by client id
/// Topics match by exact name only
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscriptions: HashMap<SubscriberId, Subscription>,
}

impl Topic {
    /// Creates a new instance of the Topic with the given name
    /// Initializes an empty set of subscriptions
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: HashMap::new(),
        }
    }

    /// Subscribes a client to the topic
    /// A repeated subscription only changes the requested QoS; queued messages are kept
    pub fn subscribe(&mut self, id: &str, qos: QoS) {
        self.subscriptions
            .entry(id.to_string())
            .and_modify(|s| s.qos = qos)
            .or_insert_with(|| Subscription::new(id, qos));
    }

    /// Unsubscribes a client from the topic
    /// Returns true if the client was subscribed
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscriptions.remove(id).is_some()
    }

    /// Hands a published message to every subscription, delivering it to
    /// the subscribers that are connected
    /// Returns the number of connected subscribers reached
    pub fn publish(&mut self, message: &Message, clients: &HashMap<SubscriberId, Client>) -> usize {
        let mut reached = 0;
        for (id, subscription) in self.subscriptions.iter_mut() {
            let client = clients.get(id);
            if client.is_some() {
                reached += 1;
            }
            subscription.publish(message, client);
        }
        reached
    }

    /// Replays the client's queued messages after it reconnects
    pub fn connected(&mut self, client: &Client) {
        if let Some(subscription) = self.subscriptions.get_mut(&client.id) {
            subscription.connected(client);
        }
    }

    pub fn pub_acked(&mut self, id: &str, message_id: u16) -> bool {
        self.subscriptions
            .get_mut(id)
            .is_some_and(|s| s.pub_acked(message_id))
    }
}
