use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::broker::topic::{SubscriberId, Topic};
use crate::client::Client;
use crate::transport::message::{Message, QoS};

/// Represents the broker that manages topics and clients
/// It routes every PUBLISH to the subscriptions of its topic and grants the
/// subscriptions clients ask for
/// Clients are tracked by the id from their CONNECT; subscriptions of a
/// client that did not ask for a clean session outlive its connection
#[derive(Debug, Default)]
pub struct Broker {
    pub(crate) topics: HashMap<String, Topic>,
    pub(crate) clients: HashMap<SubscriberId, Client>,
    clean_sessions: HashSet<SubscriberId>,
}

impl Broker {
    /// Creates a new instance of the Broker
    /// Initializes an empty set of topics and clients
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client that completed its CONNECT
    /// A clean session drops whatever the client subscribed to before; otherwise
    /// the messages its subscriptions still hold are replayed
    pub fn connect(&mut self, client: Client, clean_session: bool) {
        if let Some(previous) = self.clients.get(&client.id) {
            if previous.channel.id() != client.channel.id() {
                info!(client = %client.id, "client reconnected, replacing previous channel");
            }
        }

        if clean_session {
            self.clean_sessions.insert(client.id.clone());
            self.drop_subscriptions(&client.id);
        } else {
            self.clean_sessions.remove(&client.id);
            for topic in self.topics.values_mut() {
                topic.connected(&client);
            }
        }
        debug!(client = %client.id, clean_session, "client connected");
        self.clients.insert(client.id.clone(), client);
    }

    /// Forgets the connection of a client once its channel closed
    /// Only the channel the client is currently registered with counts, so a
    /// stale channel closing late does not unregister a reconnected client
    pub fn disconnect(&mut self, client_id: &str, channel_id: &str) {
        let current = self
            .clients
            .get(client_id)
            .is_some_and(|c| c.channel.id() == channel_id);
        if !current {
            return;
        }
        if self.clean_sessions.remove(client_id) {
            self.cleanup_client(client_id);
        } else {
            self.clients.remove(client_id);
        }
        debug!(client = %client_id, "client disconnected");
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Subscribes a client to each requested topic. Creates topics that do not exist.
    /// Returns the granted QoS per filter, which is the requested one
    pub fn subscribe(&mut self, client_id: &str, filters: &[(String, QoS)]) -> Vec<QoS> {
        filters
            .iter()
            .map(|(name, qos)| {
                self.topics
                    .entry(name.clone())
                    .or_insert_with(|| Topic::new(name))
                    .subscribe(client_id, *qos);
                debug!(client = %client_id, topic = %name, ?qos, "subscribed");
                *qos
            })
            .collect()
    }

    /// Unsubscribes a client from each topic
    /// Topics that do not exist are skipped
    pub fn unsubscribe(&mut self, client_id: &str, filters: &[String]) {
        for name in filters {
            if let Some(topic) = self.topics.get_mut(name) {
                topic.unsubscribe(client_id);
            }
        }
    }

    /// Publishes a message to all subscribers of its topic
    /// Returns the number of connected subscribers it was sent to
    pub fn publish(&mut self, message: &Message) -> usize {
        let Some(name) = message.topic.as_deref() else {
            return 0;
        };
        match self.topics.get_mut(name) {
            Some(topic) => {
                let reached = topic.publish(message, &self.clients);
                debug!(topic = %name, reached, "published");
                reached
            }
            None => {
                debug!(topic = %name, "no subscribers");
                0
            }
        }
    }

    /// Records a subscriber's acknowledgment of a delivered message
    /// Returns true if the message was waiting in one of its subscriptions
    pub fn pub_acked(&mut self, client_id: &str, message_id: u16) -> bool {
        self.topics
            .values_mut()
            .any(|topic| topic.pub_acked(client_id, message_id))
    }

    /// Messages queued for a client across all its subscriptions
    pub fn queued_for(&self, client_id: &str) -> usize {
        self.topics
            .values()
            .filter_map(|topic| topic.subscriptions.get(client_id))
            .map(|s| s.queued())
            .sum()
    }

    /// Cleans up a client by removing it and unsubscribing it from all topics
    pub fn cleanup_client(&mut self, client_id: &str) {
        self.clients.remove(client_id);
        self.drop_subscriptions(client_id);
        debug!(client = %client_id, "cleaned up client");
    }

    fn drop_subscriptions(&mut self, client_id: &str) {
        for topic in self.topics.values_mut() {
            topic.unsubscribe(client_id);
        }
    }
}
