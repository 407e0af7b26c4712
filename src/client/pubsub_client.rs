use crate::transport::channel::ChannelHandle;
use crate::transport::message::Message;
use crate::utils::error::ChannelError;

/// Represents a connected MQTT client as seen by the broker.
///
/// Each client is identified by the client id from its CONNECT and owns a
/// handle on the channel it is connected through.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client identifier taken from the CONNECT message.
    pub id: String,

    /// Handle used to send messages to the client.
    pub channel: ChannelHandle,
}

impl Client {
    pub fn new(id: impl Into<String>, channel: ChannelHandle) -> Self {
        Self {
            id: id.into(),
            channel,
        }
    }

    /// Mints a message identifier scoped to this client's channel.
    pub fn next_message_id(&self) -> Result<u16, ChannelError> {
        self.channel.next_message_id()
    }

    /// Queues a message for this client.
    pub fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.channel.send(message, None)
    }
}
