//! Protocol messages exchanged over a channel.
//!
//! A [`Message`] is the decoded form of one frame: the fixed-header fields
//! (type, DUP, QoS, RETAIN), the message identifier when the type carries
//! one, the PUBLISH topic, and an otherwise opaque body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::utils::error::DecodeError;

/// MQTT control packet type, the high nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        Ok(match value {
            1 => MessageType::Connect,
            2 => MessageType::ConnAck,
            3 => MessageType::Publish,
            4 => MessageType::PubAck,
            5 => MessageType::PubRec,
            6 => MessageType::PubRel,
            7 => MessageType::PubComp,
            8 => MessageType::Subscribe,
            9 => MessageType::SubAck,
            10 => MessageType::Unsubscribe,
            11 => MessageType::UnsubAck,
            12 => MessageType::PingReq,
            13 => MessageType::PingResp,
            14 => MessageType::Disconnect,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }

    /// Whether a message of this type carries an identifier for the given QoS.
    pub fn has_identifier(self, qos: QoS) -> bool {
        match self {
            MessageType::Publish => qos != QoS::AtMostOnce,
            MessageType::PubAck
            | MessageType::PubRec
            | MessageType::PubRel
            | MessageType::PubComp
            | MessageType::Subscribe
            | MessageType::SubAck
            | MessageType::Unsubscribe
            | MessageType::UnsubAck => true,
            _ => false,
        }
    }
}

/// Delivery guarantee of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(DecodeError::InvalidQos(other)),
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Other(u8),
}

impl ConnectReturnCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadCredentials,
            5 => ConnectReturnCode::NotAuthorized,
            other => ConnectReturnCode::Other(other),
        }
    }

    pub fn value(self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0,
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadCredentials => 4,
            ConnectReturnCode::NotAuthorized => 5,
            ConnectReturnCode::Other(code) => code,
        }
    }
}

/// How the completion of a sent message is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Completes when the CONNACK arrives; tracked by channel state, not identifier.
    Connect,
    /// Completes when the matching acknowledgment arrives; tracked by identifier.
    Acknowledged(u16),
    /// Completes as soon as the last byte is written.
    FireAndForget,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub message_id: Option<u16>,
    /// Only present for PUBLISH.
    pub topic: Option<String>,
    pub payload: Bytes,
}

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

impl Message {
    fn bare(kind: MessageType, qos: QoS) -> Self {
        Self {
            kind,
            dup: false,
            qos,
            retain: false,
            message_id: None,
            topic: None,
            payload: Bytes::new(),
        }
    }

    fn acknowledging(kind: MessageType, qos: QoS, message_id: u16) -> Self {
        Self {
            message_id: Some(message_id),
            ..Self::bare(kind, qos)
        }
    }

    /// A PUBLISH. Its identifier is assigned by the channel when it is sent with QoS > 0.
    pub fn publish(qos: QoS, retain: bool, topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            retain,
            topic: Some(topic.into()),
            payload: payload.into(),
            ..Self::bare(MessageType::Publish, qos)
        }
    }

    /// A CONNECT with the MQTT 3.1.1 variable header and a client identifier payload.
    pub fn connect(client_id: &str, clean_session: bool, keep_alive_secs: u16) -> Result<Self, DecodeError> {
        let mut body = BytesMut::new();
        put_string(&mut body, PROTOCOL_NAME, "protocol name")?;
        body.put_u8(PROTOCOL_LEVEL);
        body.put_u8(if clean_session { 0x02 } else { 0x00 });
        body.put_u16(keep_alive_secs);
        put_string(&mut body, client_id, "client identifier")?;
        Ok(Self {
            payload: body.freeze(),
            ..Self::bare(MessageType::Connect, QoS::AtMostOnce)
        })
    }

    pub fn conn_ack(code: ConnectReturnCode) -> Self {
        Self {
            payload: Bytes::from(vec![0, code.value()]),
            ..Self::bare(MessageType::ConnAck, QoS::AtMostOnce)
        }
    }

    pub fn pub_ack(message_id: u16) -> Self {
        Self::acknowledging(MessageType::PubAck, QoS::AtMostOnce, message_id)
    }

    pub fn pub_rec(message_id: u16) -> Self {
        Self::acknowledging(MessageType::PubRec, QoS::AtMostOnce, message_id)
    }

    /// PUBREL always travels at QoS 1 and waits for a PUBCOMP.
    pub fn pub_rel(message_id: u16) -> Self {
        Self::acknowledging(MessageType::PubRel, QoS::AtLeastOnce, message_id)
    }

    pub fn pub_comp(message_id: u16) -> Self {
        Self::acknowledging(MessageType::PubComp, QoS::AtMostOnce, message_id)
    }

    /// A SUBSCRIBE for the given topic filters. The identifier is assigned on send.
    pub fn subscribe(filters: &[(&str, QoS)]) -> Result<Self, DecodeError> {
        let mut body = BytesMut::new();
        for (filter, qos) in filters {
            put_string(&mut body, filter, "topic filter")?;
            body.put_u8(qos.value());
        }
        Ok(Self {
            payload: body.freeze(),
            ..Self::bare(MessageType::Subscribe, QoS::AtLeastOnce)
        })
    }

    /// A SUBACK granting one QoS per requested filter.
    pub fn sub_ack(message_id: u16, granted: &[QoS]) -> Self {
        Self {
            payload: granted.iter().map(|q| q.value()).collect::<Vec<_>>().into(),
            ..Self::acknowledging(MessageType::SubAck, QoS::AtMostOnce, message_id)
        }
    }

    pub fn unsubscribe(filters: &[&str]) -> Result<Self, DecodeError> {
        let mut body = BytesMut::new();
        for filter in filters {
            put_string(&mut body, filter, "topic filter")?;
        }
        Ok(Self {
            payload: body.freeze(),
            ..Self::bare(MessageType::Unsubscribe, QoS::AtLeastOnce)
        })
    }

    pub fn unsub_ack(message_id: u16) -> Self {
        Self::acknowledging(MessageType::UnsubAck, QoS::AtMostOnce, message_id)
    }

    pub fn ping_req() -> Self {
        Self::bare(MessageType::PingReq, QoS::AtMostOnce)
    }

    pub fn ping_resp() -> Self {
        Self::bare(MessageType::PingResp, QoS::AtMostOnce)
    }

    pub fn disconnect() -> Self {
        Self::bare(MessageType::Disconnect, QoS::AtMostOnce)
    }

    /// Returns a copy of this PUBLISH at another QoS. The identifier is dropped;
    /// a QoS > 0 copy gets a fresh one when it is sent.
    pub fn with_qos(&self, qos: QoS) -> Self {
        Self {
            qos,
            dup: false,
            message_id: None,
            ..self.clone()
        }
    }

    /// Checks the message fits the wire format. A PUBLISH topic is
    /// length-prefixed with 16 bits.
    pub fn validate(&self) -> Result<(), DecodeError> {
        match &self.topic {
            Some(topic) => check_string_len(topic, "topic"),
            None => Ok(()),
        }
    }

    /// True if the message waits in flight for an acknowledgment once written.
    pub fn is_ackable(&self) -> bool {
        self.qos != QoS::AtMostOnce
    }

    pub fn delivery_class(&self) -> DeliveryClass {
        match (self.kind, self.message_id) {
            (MessageType::Connect, _) => DeliveryClass::Connect,
            (_, Some(id)) if self.is_ackable() => DeliveryClass::Acknowledged(id),
            _ => DeliveryClass::FireAndForget,
        }
    }

    /// The CONNACK return code, if this is a CONNACK.
    pub fn return_code(&self) -> Option<ConnectReturnCode> {
        if self.kind != MessageType::ConnAck {
            return None;
        }
        self.payload.get(1).map(|code| ConnectReturnCode::from_u8(*code))
    }

    /// True if sending this message ends the connection.
    pub fn closes_channel(&self) -> bool {
        match self.kind {
            MessageType::Disconnect => true,
            MessageType::ConnAck => self.return_code() != Some(ConnectReturnCode::Accepted),
            _ => false,
        }
    }

    /// Reads the client identifier from a CONNECT body.
    pub fn connect_client_id(&self) -> Result<String, DecodeError> {
        let mut body = self.payload.clone();
        let _protocol = get_string(&mut body, "CONNECT")?;
        if body.remaining() < 4 {
            return Err(DecodeError::Truncated("CONNECT"));
        }
        body.advance(4);
        get_string(&mut body, "CONNECT")
    }

    /// Reads the clean-session flag from a CONNECT body.
    pub fn connect_clean_session(&self) -> Result<bool, DecodeError> {
        let mut body = self.payload.clone();
        let _protocol = get_string(&mut body, "CONNECT")?;
        if body.remaining() < 2 {
            return Err(DecodeError::Truncated("CONNECT"));
        }
        body.advance(1);
        Ok(body.get_u8() & 0x02 != 0)
    }

    /// Reads the (filter, requested QoS) pairs from a SUBSCRIBE body.
    pub fn subscribe_filters(&self) -> Result<Vec<(String, QoS)>, DecodeError> {
        let mut body = self.payload.clone();
        let mut filters = Vec::new();
        while body.has_remaining() {
            let filter = get_string(&mut body, "SUBSCRIBE")?;
            if !body.has_remaining() {
                return Err(DecodeError::Truncated("SUBSCRIBE"));
            }
            filters.push((filter, QoS::from_u8(body.get_u8())?));
        }
        Ok(filters)
    }

    /// Reads the topic filters from an UNSUBSCRIBE body.
    pub fn unsubscribe_filters(&self) -> Result<Vec<String>, DecodeError> {
        let mut body = self.payload.clone();
        let mut filters = Vec::new();
        while body.has_remaining() {
            filters.push(get_string(&mut body, "UNSUBSCRIBE")?);
        }
        Ok(filters)
    }
}

fn check_string_len(value: &str, field: &'static str) -> Result<(), DecodeError> {
    if value.len() > usize::from(u16::MAX) {
        return Err(DecodeError::StringTooLong { field, len: value.len() });
    }
    Ok(())
}

pub(crate) fn put_string(buf: &mut BytesMut, value: &str, field: &'static str) -> Result<(), DecodeError> {
    check_string_len(value, field)?;
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn get_string(buf: &mut Bytes, what: &'static str) -> Result<String, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated(what));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated(what));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}
