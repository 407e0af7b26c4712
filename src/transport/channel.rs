//! The channel: one connection's protocol engine.
//!
//! A [`Channel`] owns its socket and is driven by an external readiness loop
//! through [`Channel::read`], [`Channel::write`] and [`Channel::house_keeping`].
//! It never blocks and never spawns threads. `read` may queue replies, so in
//! each servicing cycle call `read` before `write`, and `house_keeping` last.
//!
//! The outbound queue and the in-flight table sit behind a lock shared with
//! every [`ChannelHandle`], so application threads can send, cancel and
//! inspect while the loop thread does the I/O. Any I/O error or protocol
//! violation closes the channel through a single path that fails every
//! pending completion and notifies the handler once.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use chrono::Utc;
use mio::event::Source;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::command::Completion;
use crate::config::ChannelSettings;
use crate::transport::codec;
use crate::transport::frame::FrameAssembler;
use crate::transport::handler::MessageHandler;
use crate::transport::housekeeping::{Check, NextCall, check};
use crate::transport::message::{ConnectReturnCode, DeliveryClass, Message, MessageType, QoS};
use crate::transport::socket::Socket;
use crate::utils::error::ChannelError;

/// Connection state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, connect not started.
    Idle,
    /// Socket-level connect in progress.
    Connecting,
    /// Socket connected. The MQTT handshake is tracked separately.
    Connected,
    Closed,
}

/// A queued message waiting to be written.
#[derive(Debug)]
struct Outgoing {
    message: Message,
    completion: Option<Completion>,
    queued_at: i64,
    /// Resend of an in-flight entry; the entry keeps the completion.
    retransmit: bool,
}

/// The head of the queue while it is being written.
#[derive(Debug)]
struct Writing {
    entry: Outgoing,
    bytes: Bytes,
    offset: usize,
}

/// A written message waiting for its acknowledgment.
#[derive(Debug)]
struct InFlight {
    message: Message,
    completion: Option<Completion>,
    last_sent: i64,
    attempts: u32,
}

#[derive(Debug)]
struct Outbound {
    state: ChannelState,
    handshake_complete: bool,
    queue: VecDeque<Outgoing>,
    writing: Option<Writing>,
    in_flight: BTreeMap<u16, InFlight>,
    /// The CONNECT, once written, until its CONNACK arrives.
    connect: Option<InFlight>,
    next_id: u16,
    last_sent: i64,
}

impl Outbound {
    fn new(state: ChannelState, now: i64) -> Self {
        Self {
            state,
            handshake_complete: false,
            queue: VecDeque::new(),
            writing: None,
            in_flight: BTreeMap::new(),
            connect: None,
            next_id: 1,
            last_sent: now,
        }
    }

    fn push(&mut self, message: Message, completion: Option<Completion>, now: i64) {
        self.queue.push_back(Outgoing {
            message,
            completion,
            queued_at: now,
            retransmit: false,
        });
    }

    fn id_in_use(&self, id: u16) -> bool {
        let pending = |m: &Message| m.is_ackable() && m.message_id == Some(id);
        self.in_flight.contains_key(&id)
            || self.writing.as_ref().is_some_and(|w| pending(&w.entry.message))
            || self.queue.iter().any(|o| pending(&o.message))
    }

    fn allocate_id(&mut self) -> Option<u16> {
        for _ in 0..u16::MAX {
            let id = self.next_id;
            self.next_id = if id == u16::MAX { 1 } else { id + 1 };
            if !self.id_in_use(id) {
                return Some(id);
            }
        }
        None
    }

    /// Removes the in-flight entry for `id` together with any resend of it
    /// that has not started going out.
    fn settle(&mut self, id: u16) -> Option<InFlight> {
        let entry = self.in_flight.remove(&id)?;
        let resend = |o: &Outgoing| o.retransmit && o.message.message_id == Some(id);
        self.queue.retain(|o| !resend(o));
        if self
            .writing
            .as_ref()
            .is_some_and(|w| w.offset == 0 && resend(&w.entry))
        {
            self.writing = None;
        }
        Some(entry)
    }

    /// True while a CONNECT is queued, being written or awaiting its CONNACK.
    fn connect_pending(&self) -> bool {
        let is_connect = |o: &Outgoing| o.message.kind == MessageType::Connect;
        self.connect.is_some()
            || self.writing.as_ref().is_some_and(|w| is_connect(&w.entry))
            || self.queue.iter().any(is_connect)
    }

    fn resend_queued(&self, id: u16) -> bool {
        let resend = |o: &Outgoing| o.retransmit && o.message.message_id == Some(id);
        self.writing.as_ref().is_some_and(|w| resend(&w.entry))
            || self.queue.iter().any(resend)
    }

    /// Writes queued frames until the socket would block or the queue is empty.
    ///
    /// Returns true if a message that ends the connection was written.
    fn flush<W: Write>(&mut self, socket: &mut W, now: i64) -> io::Result<bool> {
        loop {
            if self.writing.is_none() {
                let Some(entry) = self.queue.pop_front() else {
                    return Ok(false);
                };
                let bytes = match codec::encode(&entry.message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(kind = ?entry.message.kind, error = %e, "dropping unencodable message");
                        if let Some(c) = entry.completion {
                            c.fail(e.into());
                        }
                        continue;
                    }
                };
                self.writing = Some(Writing {
                    entry,
                    bytes,
                    offset: 0,
                });
            }
            let Some(writing) = self.writing.as_mut() else {
                return Ok(false);
            };

            match socket.write(&writing.bytes[writing.offset..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    writing.offset += n;
                    if writing.offset < writing.bytes.len() {
                        continue;
                    }
                    if let Some(done) = self.writing.take() {
                        let closes = done.entry.message.closes_channel();
                        self.written(done.entry, now);
                        if closes {
                            return Ok(true);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Applies the completion rule of a fully written message.
    fn written(&mut self, entry: Outgoing, now: i64) {
        self.last_sent = now;
        let Outgoing {
            message,
            completion,
            queued_at,
            retransmit,
        } = entry;
        trace!(kind = ?message.kind, id = ?message.message_id, queued_ms = now - queued_at, "written");

        match message.delivery_class() {
            DeliveryClass::Connect => {
                let entry = InFlight {
                    message,
                    completion,
                    last_sent: now,
                    attempts: 1,
                };
                if let Some(replaced) = self.connect.replace(entry) {
                    warn!("CONNECT written while another awaits its CONNACK");
                    if let Some(c) = replaced.completion {
                        c.fail(ChannelError::Protocol("CONNECT replaced before its CONNACK".into()));
                    }
                }
            }
            DeliveryClass::Acknowledged(id) if retransmit => {
                if let Some(entry) = self.in_flight.get_mut(&id) {
                    entry.last_sent = now;
                }
            }
            DeliveryClass::Acknowledged(id) => {
                let entry = InFlight {
                    message,
                    completion,
                    last_sent: now,
                    attempts: 1,
                };
                if let Some(replaced) = self.in_flight.insert(id, entry) {
                    warn!(id, "message identifier reused while in flight");
                    if let Some(c) = replaced.completion {
                        c.fail(ChannelError::Protocol(format!(
                            "identifier {id} reused while in flight"
                        )));
                    }
                }
            }
            DeliveryClass::FireAndForget => {
                if message.return_code() == Some(ConnectReturnCode::Accepted) {
                    self.handshake_complete = true;
                }
                if let Some(c) = completion {
                    c.succeed(None);
                }
            }
        }
    }

    fn take_completions(&mut self) -> Vec<Completion> {
        let queued = self
            .queue
            .iter_mut()
            .chain(self.writing.as_mut().map(|w| &mut w.entry))
            .filter_map(|o| o.completion.take());
        let waiting = self
            .in_flight
            .values_mut()
            .chain(self.connect.as_mut())
            .filter_map(|f| f.completion.take());
        queued.chain(waiting).collect()
    }
}

#[derive(Debug)]
struct Shared {
    id: String,
    outbound: Mutex<Outbound>,
    waker: OnceLock<Arc<Waker>>,
}

/// Thread-safe access to a channel's outbound side.
///
/// Handles can be cloned and used from any thread. Sending through a handle
/// only queues; the channel's event loop does the writing.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelHandle {
    fn new(state: ChannelState, now: i64) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: format!("channel-{}", uuid::Uuid::new_v4()),
                outbound: Mutex::new(Outbound::new(state, now)),
                waker: OnceLock::new(),
            }),
        }
    }

    /// Label used in logs.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> ChannelState {
        self.shared.outbound.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// True once the socket is connected, the CONNECT/CONNACK exchange has
    /// succeeded, and no DISCONNECT has been sent or received.
    pub fn is_connected(&self) -> bool {
        let out = self.shared.outbound.lock();
        out.state == ChannelState::Connected && out.handshake_complete
    }

    /// Queues a message for sending.
    ///
    /// A QoS > 0 message without an identifier is given a fresh one. If
    /// `completion` is given it is resolved when the message completes (see
    /// [`crate::command`]). Fails, and fails the completion, if the channel
    /// is closed.
    pub fn send(&self, message: Message, completion: Option<Completion>) -> Result<(), ChannelError> {
        let was_empty = self.enqueue(message, completion, Utc::now().timestamp_millis())?;
        if was_empty {
            if let Some(waker) = self.shared.waker.get() {
                if let Err(e) = waker.wake() {
                    warn!(channel = %self.id(), error = %e, "failed to wake event loop");
                }
            }
        }
        Ok(())
    }

    /// Returns true if the queue was empty before this message.
    fn enqueue(
        &self,
        mut message: Message,
        completion: Option<Completion>,
        now: i64,
    ) -> Result<bool, ChannelError> {
        let reject = |completion: Option<Completion>, err: ChannelError| {
            if let Some(c) = completion {
                c.fail(err.clone());
            }
            Err(err)
        };
        if let Err(e) = message.validate() {
            return reject(completion, e.into());
        }
        let mut out = self.shared.outbound.lock();
        if out.state == ChannelState::Closed {
            return reject(completion, ChannelError::Closed);
        }
        if message.kind == MessageType::Connect && (out.connect_pending() || out.handshake_complete) {
            return reject(completion, ChannelError::Protocol("CONNECT already sent".into()));
        }
        if message.kind.has_identifier(message.qos) && message.message_id.is_none() {
            let Some(id) = out.allocate_id() else {
                return reject(completion, ChannelError::IdentifiersExhausted);
            };
            message.message_id = Some(id);
        }
        trace!(channel = %self.shared.id, kind = ?message.kind, id = ?message.message_id, "queued");
        let was_empty = out.queue.is_empty() && out.writing.is_none();
        out.push(message, completion, now);
        Ok(was_empty)
    }

    /// Mints an identifier not used by any queued or in-flight message.
    pub fn next_message_id(&self) -> Result<u16, ChannelError> {
        self.shared
            .outbound
            .lock()
            .allocate_id()
            .ok_or(ChannelError::IdentifiersExhausted)
    }

    /// Cancels every pending completion without touching the socket.
    pub fn cancel_blocking_commands(&self) {
        let pending = self.shared.outbound.lock().take_completions();
        debug!(channel = %self.shared.id, count = pending.len(), "cancelling blocking commands");
        for completion in pending {
            completion.cancel();
        }
    }

    /// Queued messages, including one partially written.
    pub fn send_queue_depth(&self) -> usize {
        let out = self.shared.outbound.lock();
        out.queue.len() + usize::from(out.writing.is_some())
    }

    /// Written messages awaiting their acknowledgment, a pending CONNECT included.
    pub fn in_flight_message_count(&self) -> usize {
        let out = self.shared.outbound.lock();
        out.in_flight.len() + usize::from(out.connect.is_some())
    }

    /// How many times the in-flight message `id` has been written.
    pub fn in_flight_attempts(&self, id: u16) -> Option<u32> {
        self.shared.outbound.lock().in_flight.get(&id).map(|f| f.attempts)
    }

    /// Every message the remote side has not acknowledged: queued, partially
    /// written, then in flight. Queued resends and the CONNECT are left out.
    pub fn unsent_messages(&self) -> Vec<Message> {
        let out = self.shared.outbound.lock();
        let queued = out
            .queue
            .iter()
            .filter(|o| !o.retransmit)
            .map(|o| o.message.clone());
        let partial = out
            .writing
            .iter()
            .filter(|w| !w.entry.retransmit)
            .map(|w| w.entry.message.clone());
        let in_flight = out.in_flight.values().map(|f| f.message.clone());
        queued.chain(partial).chain(in_flight).collect()
    }
}

struct Registration {
    registry: Registry,
    token: Token,
    interest: Interest,
}

/// What to do once a received message has been handed to the handler.
enum AfterDispatch {
    Continue,
    /// A retransmitted QoS 2 PUBLISH the handler has already seen.
    Skip,
    Close(Option<ChannelError>),
}

/// A non-blocking protocol channel over socket `S`, reporting to handler `H`.
pub struct Channel<S: Socket, H: MessageHandler> {
    socket: S,
    handler: H,
    handle: ChannelHandle,
    settings: ChannelSettings,
    assembler: FrameAssembler,
    read_buf: Vec<u8>,
    last_received: i64,
    /// Accepted from a listener: the peer must open with a CONNECT.
    accepted: bool,
    connect_received: bool,
    /// Inbound QoS 2 identifiers received but not yet released by a PUBREL.
    unreleased: HashSet<u16>,
    read_paused: bool,
    registration: Option<Registration>,
}

impl<H: MessageHandler> Channel<TcpStream, H> {
    /// Starts a non-blocking TCP connect to `addr`.
    pub fn connect(
        addr: SocketAddr,
        handler: H,
        settings: ChannelSettings,
        now: i64,
    ) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)?;
        let mut channel = Channel::new(stream, handler, settings, now);
        channel.initiate_connect();
        Ok(channel)
    }
}

impl<S: Socket, H: MessageHandler> Channel<S, H> {
    /// Wraps a socket whose connect has not been started.
    pub fn new(socket: S, handler: H, settings: ChannelSettings, now: i64) -> Self {
        Self::with_state(socket, handler, settings, ChannelState::Idle, now)
    }

    /// Wraps an already connected socket, e.g. one returned by `accept`.
    pub fn accepted(socket: S, handler: H, settings: ChannelSettings, now: i64) -> Self {
        let mut channel = Self::with_state(socket, handler, settings, ChannelState::Connected, now);
        channel.accepted = true;
        channel.handler.channel_opened(&channel.handle);
        channel
    }

    fn with_state(socket: S, handler: H, settings: ChannelSettings, state: ChannelState, now: i64) -> Self {
        Self {
            socket,
            handler,
            handle: ChannelHandle::new(state, now),
            assembler: FrameAssembler::new(settings.max_frame_bytes),
            read_buf: vec![0; settings.read_buffer_bytes.max(1)],
            settings,
            last_received: now,
            accepted: false,
            connect_received: false,
            unreleased: HashSet::new(),
            read_paused: false,
            registration: None,
        }
    }

    /// Marks the socket-level connect as started: `Idle -> Connecting`.
    ///
    /// Returns false if the channel was not idle.
    pub fn initiate_connect(&mut self) -> bool {
        let mut out = self.handle.shared.outbound.lock();
        if out.state != ChannelState::Idle {
            return false;
        }
        out.state = ChannelState::Connecting;
        true
    }

    /// Finishes a pending connect. Call when the loop reports the socket
    /// writable while [`Channel::is_connection_pending`].
    ///
    /// Returns true if and only if the socket is now connected.
    pub fn finish_connect(&mut self) -> bool {
        match self.state() {
            ChannelState::Connecting => {}
            state => return state == ChannelState::Connected,
        }
        match self.socket.finish_connect() {
            Ok(true) => {
                self.handle.shared.outbound.lock().state = ChannelState::Connected;
                debug!(channel = %self.handle.id(), remote = ?self.socket.peer_addr().ok(), "connected");
                self.handler.channel_opened(&self.handle);
                self.update_interest();
                self.is_open()
            }
            Ok(false) => false,
            Err(e) => {
                self.close_with(e.into());
                false
            }
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    /// True until the channel is closed.
    pub fn is_open(&self) -> bool {
        self.state() != ChannelState::Closed
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn is_connection_pending(&self) -> bool {
        self.state() == ChannelState::Connecting
    }

    pub fn remote_address(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    pub fn local_address(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Interest the loop should watch for this channel.
    pub fn interest(&self) -> Interest {
        match self.state() {
            ChannelState::Connecting => Interest::WRITABLE,
            _ if self.read_paused => Interest::WRITABLE,
            _ => Interest::READABLE | Interest::WRITABLE,
        }
    }

    /// Registers the socket with `registry` under `token`.
    ///
    /// Returns false if the channel is, or because of this call becomes, closed.
    pub fn register(&mut self, registry: &Registry, token: Token) -> bool {
        if !self.is_open() {
            return false;
        }
        let interest = self.interest();
        let result = registry.try_clone().and_then(|owned| {
            self.socket.register(registry, token, interest)?;
            Ok(owned)
        });
        match result {
            Ok(registry) => {
                self.registration = Some(Registration {
                    registry,
                    token,
                    interest,
                });
                true
            }
            Err(e) => {
                self.close_with(e.into());
                false
            }
        }
    }

    pub fn deregister(&mut self) {
        if let Some(registration) = self.registration.take() {
            if let Err(e) = self.socket.deregister(&registration.registry) {
                debug!(channel = %self.handle.id(), error = %e, "deregister failed");
            }
        }
    }

    /// Wakes the event loop when a handle queues onto an empty queue.
    pub fn set_waker(&self, waker: Arc<Waker>) {
        let _ = self.handle.shared.waker.set(waker);
    }

    /// Stops asking the loop for read readiness.
    pub fn pause_read(&mut self) {
        self.read_paused = true;
        self.update_interest();
    }

    pub fn resume_read(&mut self) {
        self.read_paused = false;
        self.update_interest();
    }

    fn update_interest(&mut self) {
        let interest = self.interest();
        let Some(registration) = self.registration.as_mut() else {
            return;
        };
        if registration.interest == interest {
            return;
        }
        match self
            .socket
            .reregister(&registration.registry, registration.token, interest)
        {
            Ok(()) => registration.interest = interest,
            Err(e) => self.close_with(e.into()),
        }
    }

    /// Queues a message and, if nothing else was queued, writes it right away.
    pub fn send(&mut self, message: Message, completion: Option<Completion>) -> Result<(), ChannelError> {
        let now = Utc::now().timestamp_millis();
        let was_empty = self.handle.enqueue(message, completion, now)?;
        if was_empty && self.state() == ChannelState::Connected {
            self.write(now);
        }
        Ok(())
    }

    pub fn next_message_id(&self) -> Result<u16, ChannelError> {
        self.handle.next_message_id()
    }

    pub fn cancel_blocking_commands(&self) {
        self.handle.cancel_blocking_commands()
    }

    pub fn send_queue_depth(&self) -> usize {
        self.handle.send_queue_depth()
    }

    pub fn in_flight_message_count(&self) -> usize {
        self.handle.in_flight_message_count()
    }

    pub fn unsent_messages(&self) -> Vec<Message> {
        self.handle.unsent_messages()
    }

    /// Reads everything available and dispatches each complete frame.
    ///
    /// Returns false if the channel was closed by this call, was already
    /// closed, or has not finished connecting.
    pub fn read(&mut self, now: i64) -> bool {
        if self.state() != ChannelState::Connected {
            return false;
        }
        loop {
            match self.socket.read(&mut self.read_buf) {
                Ok(0) => {
                    debug!(channel = %self.handle.id(), "end of stream");
                    self.close();
                    return false;
                }
                Ok(n) => {
                    self.last_received = now;
                    self.assembler.push(&self.read_buf[..n]);
                    if !self.dispatch_frames(now) {
                        return false;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close_with(e.into());
                    return false;
                }
            }
        }
    }

    fn dispatch_frames(&mut self, now: i64) -> bool {
        loop {
            let decoded = match self.assembler.next_frame() {
                Ok(Some(frame)) => codec::decode(frame),
                Ok(None) => return true,
                Err(e) => Err(e),
            };
            let message = match decoded {
                Ok(message) => message,
                Err(e) => {
                    self.close_with(e.into());
                    return false;
                }
            };
            trace!(channel = %self.handle.id(), kind = ?message.kind, id = ?message.message_id, "received");

            let after = match self.track_inbound(&message, now) {
                Ok(after) => after,
                Err(e) => {
                    self.close_with(e);
                    return false;
                }
            };
            match after {
                AfterDispatch::Skip => {
                    debug!(channel = %self.handle.id(), id = ?message.message_id, "duplicate QoS 2 publish not redelivered");
                }
                AfterDispatch::Continue => self.handler.message_received(&self.handle, message),
                AfterDispatch::Close(cause) => {
                    self.handler.message_received(&self.handle, message);
                    self.shutdown(cause);
                    return false;
                }
            }
        }
    }

    /// Protocol bookkeeping for one received message: checks it is expected
    /// in the current state, settles acknowledgments and queues automatic replies.
    fn track_inbound(&mut self, message: &Message, now: i64) -> Result<AfterDispatch, ChannelError> {
        let mut out = self.handle.shared.outbound.lock();
        let id = message.message_id.unwrap_or_default();

        if self.accepted {
            if !self.connect_received && message.kind != MessageType::Connect {
                return Err(ChannelError::Protocol(format!("{:?} before CONNECT", message.kind)));
            }
        } else if !out.handshake_complete && message.kind != MessageType::ConnAck {
            return Err(ChannelError::Protocol(format!("{:?} before CONNACK", message.kind)));
        }

        match message.kind {
            MessageType::Connect => {
                if self.connect_received || out.connect.is_some() || out.handshake_complete {
                    return Err(ChannelError::Protocol("unexpected CONNECT".into()));
                }
                self.connect_received = true;
            }
            MessageType::ConnAck => {
                let Some(connect) = out.connect.take() else {
                    return Err(ChannelError::Protocol("CONNACK without a pending CONNECT".into()));
                };
                if let Some(c) = connect.completion {
                    c.succeed(Some(message.clone()));
                }
                match message.return_code() {
                    Some(ConnectReturnCode::Accepted) => {
                        out.handshake_complete = true;
                        info!(channel = %self.handle.id(), "connection accepted");
                    }
                    Some(code) => {
                        warn!(channel = %self.handle.id(), ?code, "connection rejected");
                        return Ok(AfterDispatch::Close(Some(ChannelError::Rejected(code))));
                    }
                    None => return Err(ChannelError::Protocol("CONNACK without return code".into())),
                }
            }
            MessageType::Publish => match message.qos {
                QoS::AtMostOnce => {}
                QoS::AtLeastOnce => out.push(Message::pub_ack(id), None, now),
                QoS::ExactlyOnce => {
                    out.push(Message::pub_rec(id), None, now);
                    if !self.unreleased.insert(id) {
                        return Ok(AfterDispatch::Skip);
                    }
                }
            },
            MessageType::PubAck | MessageType::PubComp | MessageType::SubAck | MessageType::UnsubAck => {
                match out.settle(id) {
                    Some(entry) => {
                        if let Some(c) = entry.completion {
                            c.succeed(Some(message.clone()));
                        }
                    }
                    None => debug!(channel = %self.handle.id(), id, kind = ?message.kind, "ignoring unmatched ack"),
                }
            }
            MessageType::PubRec => match out.settle(id) {
                // second phase: the PUBREL takes over the identifier and the completion
                Some(entry) => out.push(Message::pub_rel(id), entry.completion, now),
                None => debug!(channel = %self.handle.id(), id, "ignoring unmatched PUBREC"),
            },
            MessageType::PubRel => {
                self.unreleased.remove(&id);
                out.push(Message::pub_comp(id), None, now);
            }
            MessageType::PingReq => out.push(Message::ping_resp(), None, now),
            MessageType::PingResp | MessageType::Subscribe | MessageType::Unsubscribe => {}
            MessageType::Disconnect => {
                debug!(channel = %self.handle.id(), "DISCONNECT received");
                return Ok(AfterDispatch::Close(None));
            }
        }
        Ok(AfterDispatch::Continue)
    }

    /// Writes as much of the queue as the socket accepts.
    ///
    /// Returns false if the channel was closed by this call, was already
    /// closed, or has not finished connecting.
    pub fn write(&mut self, now: i64) -> bool {
        if self.state() != ChannelState::Connected {
            return false;
        }
        let flushed = {
            let mut out = self.handle.shared.outbound.lock();
            out.flush(&mut self.socket, now)
        };
        match flushed {
            Ok(false) => true,
            Ok(true) => {
                debug!(channel = %self.handle.id(), "closing after final message");
                self.close();
                false
            }
            Err(e) => {
                self.close_with(e.into());
                false
            }
        }
    }

    /// Resends overdue in-flight messages, probes an idle connection and
    /// closes a silent one.
    ///
    /// Returns the milliseconds until the next call is due, or a negative
    /// value if this call closed the channel.
    pub fn house_keeping(&mut self, now: i64) -> i64 {
        if !self.is_open() {
            return -1;
        }
        let mut next = NextCall::default();

        match check(self.last_received, now, self.settings.max_silence_ms) {
            Some(Check::Due) => {
                let silent = now - self.last_received;
                warn!(channel = %self.handle.id(), silent_ms = silent, "no traffic from peer, closing");
                self.close_with(ChannelError::Timeout(silent));
                return -1;
            }
            Some(Check::Wait(ms)) => next.within(ms),
            None => {}
        }

        let queued = {
            let mut out = self.handle.shared.outbound.lock();
            if out.state == ChannelState::Connected {
                let resent = self.resend_overdue(&mut out, now, &mut next);
                resent | self.probe_if_idle(&mut out, now, &mut next)
            } else {
                false
            }
        };

        if queued && !self.write(now) {
            return -1;
        }
        next.millis()
    }

    fn resend_overdue(&self, out: &mut Outbound, now: i64, next: &mut NextCall) -> bool {
        let interval = self.settings.resend_interval_ms;
        let mut due = Vec::new();
        for (&id, entry) in out.in_flight.iter() {
            match check(entry.last_sent, now, interval) {
                Some(Check::Due) => due.push(id),
                Some(Check::Wait(ms)) => next.within(ms),
                None => return false,
            }
        }

        let mut queued = false;
        for id in due {
            next.within(interval);
            if out.resend_queued(id) {
                continue;
            }
            let Some(entry) = out.in_flight.get_mut(&id) else {
                continue;
            };
            entry.last_sent = now;
            entry.attempts += 1;
            let mut message = entry.message.clone();
            if message.kind == MessageType::Publish {
                message.dup = true;
            }
            debug!(channel = %self.handle.id(), id, attempts = entry.attempts, "resending unacknowledged message");
            out.queue.push_back(Outgoing {
                message,
                completion: None,
                queued_at: now,
                retransmit: true,
            });
            queued = true;
        }
        queued
    }

    fn probe_if_idle(&self, out: &mut Outbound, now: i64, next: &mut NextCall) -> bool {
        if !out.handshake_complete {
            return false;
        }
        let keep_alive = self.settings.keep_alive_ms;
        match check(out.last_sent, now, keep_alive) {
            Some(Check::Due) => {
                trace!(channel = %self.handle.id(), "keep-alive probe");
                out.push(Message::ping_req(), None, now);
                out.last_sent = now;
                next.within(keep_alive);
                true
            }
            Some(Check::Wait(ms)) => {
                next.within(ms);
                false
            }
            None => false,
        }
    }

    /// Closes the channel in an orderly way.
    pub fn close(&mut self) {
        self.shutdown(None);
    }

    /// Closes the channel, reporting `cause` to every pending completion and
    /// to the handler.
    pub fn close_with(&mut self, cause: ChannelError) {
        self.shutdown(Some(cause));
    }

    fn shutdown(&mut self, cause: Option<ChannelError>) {
        let pending = {
            let mut out = self.handle.shared.outbound.lock();
            if out.state == ChannelState::Closed {
                return;
            }
            out.state = ChannelState::Closed;
            out.take_completions()
        };
        self.unreleased.clear();

        self.deregister();
        self.socket.shutdown();

        match &cause {
            Some(e) => warn!(channel = %self.handle.id(), error = %e, pending = pending.len(), "channel closed"),
            None => debug!(channel = %self.handle.id(), pending = pending.len(), "channel closed"),
        }
        let failure = cause.clone().unwrap_or(ChannelError::Closed);
        for completion in pending {
            completion.fail(failure.clone());
        }
        self.handler.channel_closed(&self.handle, cause.as_ref());
    }
}
