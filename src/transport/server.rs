//! A single-threaded TCP server hosting broker channels.
//!
//! One mio [`Poll`] drives the listener and every accepted channel. Each
//! cycle reads whatever is readable, writes whatever is writable, then runs a
//! pass over all channels that flushes replies queued while reading and does
//! housekeeping. The shortest housekeeping deadline becomes the next poll
//! timeout.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::client::Client;
use crate::config::ChannelSettings;
use crate::transport::channel::{Channel, ChannelHandle};
use crate::transport::handler::MessageHandler;
use crate::transport::housekeeping::{NO_DEADLINE, NextCall};
use crate::transport::message::{ConnectReturnCode, Message, MessageType};
use crate::utils::error::ChannelError;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CHANNEL: usize = 2;

/// Forwards what one connection receives to the shared broker.
#[derive(Debug)]
pub struct BrokerSession {
    broker: Arc<Mutex<Broker>>,
    client_id: Option<String>,
}

impl BrokerSession {
    pub fn new(broker: Arc<Mutex<Broker>>) -> Self {
        Self {
            broker,
            client_id: None,
        }
    }

    /// Client id from the accepted CONNECT, if any.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn reply(channel: &ChannelHandle, message: Message) {
        if let Err(e) = channel.send(message, None) {
            debug!(channel = %channel.id(), error = %e, "reply dropped");
        }
    }

    fn connect(&mut self, channel: &ChannelHandle, message: &Message) {
        let client_id = message.connect_client_id().unwrap_or_default();
        if client_id.is_empty() {
            warn!(channel = %channel.id(), "rejecting CONNECT without client id");
            Self::reply(channel, Message::conn_ack(ConnectReturnCode::IdentifierRejected));
            return;
        }
        let clean_session = message.connect_clean_session().unwrap_or(true);

        // the CONNACK goes out before any replayed message
        Self::reply(channel, Message::conn_ack(ConnectReturnCode::Accepted));
        self.broker
            .lock()
            .connect(Client::new(client_id.clone(), channel.clone()), clean_session);
        info!(channel = %channel.id(), client = %client_id, clean_session, "client connected");
        self.client_id = Some(client_id);
    }
}

impl MessageHandler for BrokerSession {
    fn message_received(&mut self, channel: &ChannelHandle, message: Message) {
        if message.kind == MessageType::Connect {
            self.connect(channel, &message);
            return;
        }
        let Some(client_id) = self.client_id.as_deref() else {
            debug!(channel = %channel.id(), kind = ?message.kind, "ignoring message before CONNECT");
            return;
        };
        let id = message.message_id.unwrap_or_default();

        match message.kind {
            MessageType::Subscribe => match message.subscribe_filters() {
                Ok(filters) => {
                    let granted = self.broker.lock().subscribe(client_id, &filters);
                    Self::reply(channel, Message::sub_ack(id, &granted));
                }
                Err(e) => warn!(client = %client_id, error = %e, "bad SUBSCRIBE"),
            },
            MessageType::Unsubscribe => match message.unsubscribe_filters() {
                Ok(filters) => {
                    self.broker.lock().unsubscribe(client_id, &filters);
                    Self::reply(channel, Message::unsub_ack(id));
                }
                Err(e) => warn!(client = %client_id, error = %e, "bad UNSUBSCRIBE"),
            },
            MessageType::Publish => {
                self.broker.lock().publish(&message);
            }
            MessageType::PubAck | MessageType::PubComp => {
                self.broker.lock().pub_acked(client_id, id);
            }
            _ => {}
        }
    }

    fn channel_closed(&mut self, channel: &ChannelHandle, cause: Option<&ChannelError>) {
        if let Some(client_id) = self.client_id.take() {
            self.broker.lock().disconnect(&client_id, channel.id());
            match cause {
                Some(e) => info!(client = %client_id, error = %e, "client connection lost"),
                None => info!(client = %client_id, "client disconnected"),
            }
        }
    }
}

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct ServerControl {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerControl {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake server loop");
        }
    }
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    waker: Arc<Waker>,
    broker: Arc<Mutex<Broker>>,
    settings: ChannelSettings,
    channels: HashMap<Token, Channel<TcpStream, BrokerSession>>,
    next_token: usize,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Binds the listening socket. Port 0 picks a free port.
    pub fn bind(addr: SocketAddr, settings: ChannelSettings) -> Result<Self, ChannelError> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(Self {
            poll,
            listener,
            waker,
            broker: Arc::new(Mutex::new(Broker::new())),
            settings,
            channels: HashMap::new(),
            next_token: FIRST_CHANNEL,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        self.broker.clone()
    }

    pub fn control(&self) -> ServerControl {
        ServerControl {
            running: self.running.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.channels.len()
    }

    /// Runs the event loop until [`ServerControl::stop`] is called.
    pub fn run(&mut self) -> Result<(), ChannelError> {
        info!(addr = ?self.listener.local_addr().ok(), "MQTT server listening");
        let mut events = Events::with_capacity(256);
        let mut timeout = None;

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            let now = Utc::now().timestamp_millis();

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(now),
                    WAKER => {}
                    token => {
                        let Some(channel) = self.channels.get_mut(&token) else {
                            continue;
                        };
                        if event.is_readable() || event.is_read_closed() {
                            channel.read(now);
                        }
                        if event.is_writable() {
                            channel.write(now);
                        }
                    }
                }
            }
            timeout = self.service(now);
        }

        let remaining = self.channels.len();
        for (_, mut channel) in self.channels.drain() {
            channel.close();
        }
        info!(closed = remaining, "MQTT server stopped");
        Ok(())
    }

    fn accept(&mut self, now: i64) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    let session = BrokerSession::new(self.broker.clone());
                    let mut channel = Channel::accepted(stream, session, self.settings.clone(), now);
                    channel.set_waker(self.waker.clone());
                    if channel.register(self.poll.registry(), token) {
                        debug!(channel = %channel.handle().id(), %addr, "accepted connection");
                        self.channels.insert(token, channel);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    /// Flushes queued messages, runs housekeeping and drops closed channels.
    ///
    /// Returns the poll timeout until the nearest housekeeping deadline.
    fn service(&mut self, now: i64) -> Option<Duration> {
        let mut next = NextCall::default();
        self.channels.retain(|_, channel| {
            if channel.send_queue_depth() > 0 {
                channel.write(now);
            }
            let due = channel.house_keeping(now);
            if due >= 0 {
                next.within(due);
            }
            channel.is_open()
        });
        match next.millis() {
            NO_DEADLINE => None,
            ms => Some(Duration::from_millis(ms as u64)),
        }
    }
}
