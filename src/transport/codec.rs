//! Message <-> frame conversion.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::transport::frame::parse_header;
use crate::transport::message::{Message, MessageType, QoS, get_string, put_string};
use crate::utils::error::DecodeError;

/// Encodes a message into one complete frame.
pub fn encode(message: &Message) -> Result<Bytes, DecodeError> {
    let mut body = BytesMut::with_capacity(message.payload.len() + 16);
    if message.kind == MessageType::Publish {
        put_string(&mut body, message.topic.as_deref().unwrap_or_default(), "topic")?;
    }
    if message.kind.has_identifier(message.qos) {
        body.put_u16(message.message_id.unwrap_or_default());
    }
    body.put_slice(&message.payload);

    let mut first = (message.kind as u8) << 4;
    first |= message.qos.value() << 1;
    if message.dup {
        first |= 0x08;
    }
    if message.retain {
        first |= 0x01;
    }

    let mut frame = BytesMut::with_capacity(body.len() + 5);
    frame.put_u8(first);
    put_remaining_length(&mut frame, body.len());
    frame.put_slice(&body);
    Ok(frame.freeze())
}

fn put_remaining_length(buf: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decodes one complete frame as produced by the frame assembler.
pub fn decode(frame: Bytes) -> Result<Message, DecodeError> {
    let Some((remaining, header_len)) = parse_header(&frame)? else {
        return Err(DecodeError::Truncated("fixed header"));
    };
    if frame.len() < header_len + remaining {
        return Err(DecodeError::Truncated("frame"));
    }

    let first = frame[0];
    let kind = MessageType::from_u8(first >> 4)?;
    let qos = QoS::from_u8((first >> 1) & 0x03)?;
    let mut body = frame.slice(header_len..header_len + remaining);

    let topic = if kind == MessageType::Publish {
        Some(get_string(&mut body, "PUBLISH")?)
    } else {
        None
    };
    let message_id = if kind.has_identifier(qos) {
        if body.remaining() < 2 {
            return Err(DecodeError::Truncated("message identifier"));
        }
        Some(body.get_u16())
    } else {
        None
    };

    Ok(Message {
        kind,
        dup: first & 0x08 != 0,
        qos,
        retain: first & 0x01 != 0,
        message_id,
        topic,
        payload: body,
    })
}
