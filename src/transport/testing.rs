//! In-memory socket and recording handler used by unit tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::event::Source;
use mio::{Interest, Registry, Token};
use parking_lot::Mutex;

use crate::config::ChannelSettings;
use crate::transport::channel::{Channel, ChannelHandle};
use crate::transport::codec;
use crate::transport::frame::FrameAssembler;
use crate::transport::handler::MessageHandler;
use crate::transport::message::Message;
use crate::transport::socket::Socket;
use crate::utils::error::ChannelError;

#[derive(Debug, Default)]
struct MockState {
    incoming: VecDeque<Vec<u8>>,
    eof: bool,
    read_error: Option<ErrorKind>,
    write_error: Option<ErrorKind>,
    /// Bytes accepted before writes report WouldBlock; None is unlimited.
    write_budget: Option<usize>,
    written: Vec<u8>,
    connected: bool,
    connect_error: Option<ErrorKind>,
    shut_down: bool,
}

/// Scripted socket. Clones share state so a test can keep one copy while the
/// channel owns another.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockSocket {
    state: Arc<Mutex<MockState>>,
}

impl MockSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes `bytes` available to the next read as one chunk.
    pub(crate) fn feed(&self, bytes: &[u8]) {
        self.state.lock().incoming.push_back(bytes.to_vec());
    }

    pub(crate) fn feed_message(&self, message: &Message) {
        self.feed(&codec::encode(message).expect("test message encodes"));
    }

    pub(crate) fn close_remote(&self) {
        self.state.lock().eof = true;
    }

    pub(crate) fn fail_reads(&self, kind: ErrorKind) {
        self.state.lock().read_error = Some(kind);
    }

    pub(crate) fn fail_writes(&self, kind: ErrorKind) {
        self.state.lock().write_error = Some(kind);
    }

    pub(crate) fn set_write_budget(&self, budget: Option<usize>) {
        self.state.lock().write_budget = budget;
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub(crate) fn fail_connect(&self, kind: ErrorKind) {
        self.state.lock().connect_error = Some(kind);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    pub(crate) fn written_len(&self) -> usize {
        self.state.lock().written.len()
    }

    /// Decodes and removes every complete frame written so far.
    pub(crate) fn take_written(&self) -> Vec<Message> {
        let bytes = std::mem::take(&mut self.state.lock().written);
        let mut assembler = FrameAssembler::new(usize::MAX);
        assembler.push(&bytes);
        let mut messages = Vec::new();
        while let Ok(Some(frame)) = assembler.next_frame() {
            messages.push(codec::decode(frame).expect("written frame decodes"));
        }
        assert_eq!(assembler.buffered(), 0, "partial frame left in written bytes");
        messages
    }
}

impl Read for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if let Some(mut chunk) = state.incoming.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                state.incoming.push_front(chunk.split_off(n));
            }
            return Ok(n);
        }
        if let Some(kind) = state.read_error {
            return Err(kind.into());
        }
        if state.eof {
            return Ok(0);
        }
        Err(ErrorKind::WouldBlock.into())
    }
}

impl Write for MockSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }
        let n = match state.write_budget {
            Some(0) => return Err(ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= n;
        }
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Source for MockSocket {
    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
        Ok(())
    }

    fn reregister(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
        Ok(())
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for MockSocket {
    fn finish_connect(&mut self) -> io::Result<bool> {
        let state = self.state.lock();
        match state.connect_error {
            Some(kind) => Err(kind.into()),
            None => Ok(state.connected),
        }
    }

    fn shutdown(&mut self) {
        self.state.lock().shut_down = true;
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 1883)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 50000)))
    }
}

#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub(crate) opened: usize,
    pub(crate) received: Vec<Message>,
    pub(crate) closed: Vec<Option<ChannelError>>,
}

/// Handler that records every callback.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingHandler {
    pub(crate) recorded: Arc<Mutex<Recorded>>,
}

impl RecordingHandler {
    pub(crate) fn received(&self) -> Vec<Message> {
        self.recorded.lock().received.clone()
    }

    pub(crate) fn closed(&self) -> Vec<Option<ChannelError>> {
        self.recorded.lock().closed.clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn channel_opened(&mut self, _channel: &ChannelHandle) {
        self.recorded.lock().opened += 1;
    }

    fn message_received(&mut self, _channel: &ChannelHandle, message: Message) {
        self.recorded.lock().received.push(message);
    }

    fn channel_closed(&mut self, _channel: &ChannelHandle, cause: Option<&ChannelError>) {
        self.recorded.lock().closed.push(cause.cloned());
    }
}

pub(crate) type MockChannel<H = RecordingHandler> = Channel<MockSocket, H>;

/// A channel over a connected mock socket, as the broker side sees an accepted connection.
pub(crate) fn accepted_channel(settings: ChannelSettings, now: i64) -> (MockChannel, MockSocket, RecordingHandler) {
    let socket = MockSocket::new();
    socket.set_connected(true);
    let handler = RecordingHandler::default();
    let channel = Channel::accepted(socket.clone(), handler.clone(), settings, now);
    (channel, socket, handler)
}
