use crate::transport::channel::ChannelHandle;
use crate::transport::message::Message;
use crate::utils::error::ChannelError;

/// Receives what a channel reads.
///
/// Called on the event-loop thread. Implementations may send through the
/// handle; anything they queue is flushed by the channel's next `write`.
pub trait MessageHandler {
    /// Called once the socket-level connect has finished or an accepted
    /// connection has been wrapped.
    fn channel_opened(&mut self, _channel: &ChannelHandle) {}

    /// Called for every decoded frame, in arrival order.
    fn message_received(&mut self, channel: &ChannelHandle, message: Message);

    /// Called exactly once when the channel closes. `cause` is `None` for an
    /// orderly close.
    fn channel_closed(&mut self, channel: &ChannelHandle, cause: Option<&ChannelError>);
}
