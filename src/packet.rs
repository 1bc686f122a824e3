//! # MQTT Packet Structures and Serialization
//!
//! The MQTT v3.1.1 control packets a subscribing client needs, with the
//! traits used to encode them into and decode them from a byte buffer.
//! Decoders receive exactly one complete frame (see [`crate::util::frame_len`]).

use crate::error::{CodecError, ProtocolError};
use crate::util::{self, read_u16, read_utf8_string, write_binary, write_utf8_string};
use heapless::Vec;

/// Maximum number of return codes accepted in one SUBACK.
pub const MAX_SUBSCRIBE_TOPICS: usize = 8;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, CodecError> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket.into()),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the packet at the start of `buf`, returning the frame length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;
}

/// A trait for packets that can be decoded from a byte buffer.
pub trait DecodePacket<'a>: Sized {
    fn decode(frame: &'a [u8]) -> Result<Self, CodecError>;
}

/// An enumeration of the control packets a client can receive.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete frame into an `MqttPacket`.
pub fn decode(frame: &[u8]) -> Result<MqttPacket<'_>, CodecError> {
    let first = *frame.first().ok_or(ProtocolError::MalformedPacket)?;
    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(frame)?),
        3 => MqttPacket::Publish(Publish::decode(frame)?),
        9 => MqttPacket::SubAck(SubAck::decode(frame)?),
        13 => MqttPacket::PingResp,
        _ => return Err(ProtocolError::InvalidPacketType(packet_type).into()),
    };
    Ok(packet)
}

/// Splits a frame into its fixed-header byte and its variable header + payload.
fn body(frame: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    let mut cursor = 1;
    let remaining = util::read_variable_byte_integer(&mut cursor, frame)?
        .ok_or(ProtocolError::MalformedPacket)?;
    let body = frame
        .get(cursor..cursor + remaining)
        .ok_or(ProtocolError::MalformedPacket)?;
    Ok((frame[0], body))
}

/// Writes `header` and the remaining length, then the body produced by `write_body`.
///
/// The body is written after a worst-case four-byte length field and moved
/// back once its size is known.
fn encode_frame(
    buf: &mut [u8],
    header: u8,
    write_body: impl FnOnce(&mut [u8]) -> Result<usize, CodecError>,
) -> Result<usize, CodecError> {
    if buf.len() < 5 {
        return Err(CodecError::BufferTooSmall);
    }
    buf[0] = header;
    let content_start = 5;
    let remaining_len = write_body(&mut buf[content_start..])?;
    let len_bytes = util::write_variable_byte_integer(&mut buf[1..], remaining_len)?;
    let header_len = 1 + len_bytes;
    buf.copy_within(content_start..content_start + remaining_len, header_len);
    Ok(header_len + remaining_len)
}

// --- CONNECT Packet ---
#[derive(Debug, Clone)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            clean_session,
            keep_alive,
            client_id,
            username: None,
            password: None,
        }
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        encode_frame(buf, 0x10, |out| {
            let mut cursor = write_utf8_string(out, "MQTT")?;
            let fixed = out
                .get_mut(cursor..cursor + 4)
                .ok_or(CodecError::BufferTooSmall)?;
            // Protocol level 4 is MQTT 3.1.1
            fixed[0] = 4;
            let mut flags = 0;
            if self.clean_session {
                flags |= 0x02;
            }
            if self.username.is_some() {
                flags |= 0x80;
            }
            if self.password.is_some() {
                flags |= 0x40;
            }
            fixed[1] = flags;
            fixed[2..4].copy_from_slice(&self.keep_alive.to_be_bytes());
            cursor += 4;

            cursor += write_utf8_string(&mut out[cursor..], self.client_id)?;
            if let Some(username) = self.username {
                cursor += write_utf8_string(&mut out[cursor..], username)?;
            }
            if let Some(password) = self.password {
                cursor += write_binary(&mut out[cursor..], password)?;
            }
            Ok(cursor)
        })
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (_, body) = body(frame)?;
        let [flags, return_code] = body else {
            return Err(ProtocolError::MalformedPacket.into());
        };
        Ok(Self {
            session_present: (flags & 0x01) != 0,
            return_code: *return_code,
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(frame: &'a [u8]) -> Result<Self, CodecError> {
        let (header, body) = body(frame)?;
        let qos = QoS::from_bits((header >> 1) & 0x03)?;
        let retain = (header & 0x01) != 0;

        let mut cursor = 0;
        let topic = read_utf8_string(&mut cursor, body)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            retain,
            payload: &body[cursor..],
            packet_id,
        })
    }
}

#[cfg(test)]
impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let header = 0x30 | ((self.qos as u8) << 1) | u8::from(self.retain);
        encode_frame(buf, header, |out| {
            let mut cursor = write_utf8_string(out, self.topic)?;
            if self.qos != QoS::AtMostOnce {
                let id = self.packet_id.ok_or(ProtocolError::MalformedPacket)?;
                out.get_mut(cursor..cursor + 2)
                    .ok_or(CodecError::BufferTooSmall)?
                    .copy_from_slice(&id.to_be_bytes());
                cursor += 2;
            }
            out.get_mut(cursor..cursor + self.payload.len())
                .ok_or(CodecError::BufferTooSmall)?
                .copy_from_slice(self.payload);
            Ok(cursor + self.payload.len())
        })
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let frame = buf.get_mut(0..4).ok_or(CodecError::BufferTooSmall)?;
        frame[0] = 0x40;
        frame[1] = 0x02;
        frame[2..4].copy_from_slice(&self.packet_id.to_be_bytes());
        Ok(4)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug, Clone)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
    pub qos: QoS,
}

impl<'a> Subscribe<'a> {
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        Self {
            packet_id,
            topic,
            qos,
        }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        // Fixed header: SUBSCRIBE packet type (8) with reserved bits (0x02)
        encode_frame(buf, 0x82, |out| {
            let mut cursor = 0;
            out.get_mut(0..2)
                .ok_or(CodecError::BufferTooSmall)?
                .copy_from_slice(&self.packet_id.to_be_bytes());
            cursor += 2;

            cursor += write_utf8_string(&mut out[cursor..], self.topic)?;
            *out.get_mut(cursor).ok_or(CodecError::BufferTooSmall)? = self.qos as u8;
            Ok(cursor + 1)
        })
    }
}

// --- SUBACK Packet ---

/// Return code a broker uses in SUBACK to reject a topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, MAX_SUBSCRIBE_TOPICS>,
}

impl SubAck {
    /// Returns `true` if the broker rejected any of the requested filters.
    pub fn has_failure(&self) -> bool {
        self.return_codes.iter().any(|&c| c == SUBACK_FAILURE)
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (_, body) = body(frame)?;
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;

        let mut return_codes = Vec::new();
        for &code in &body[cursor..] {
            return_codes
                .push(code)
                .map_err(|_| ProtocolError::MalformedPacket)?;
        }

        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let frame = buf.get_mut(0..2).ok_or(CodecError::BufferTooSmall)?;
        frame.copy_from_slice(&[0xC0, 0x00]);
        Ok(2)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let frame = buf.get_mut(0..2).ok_or(CodecError::BufferTooSmall)?;
        frame.copy_from_slice(&[0xE0, 0x00]);
        Ok(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_layout() {
        let mut buf = [0u8; 64];
        let n = Connect::new("dev", 60, true).encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            &[
                0x10, 15, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, 0x02, 0x00, 60, // level, flags, keep-alive
                0x00, 0x03, b'd', b'e', b'v', // client id
            ]
        );
    }

    #[test]
    fn connect_with_credentials_sets_flags() {
        let mut buf = [0u8; 64];
        let mut connect = Connect::new("c", 30, false);
        connect.username = Some("u");
        connect.password = Some(b"p");
        let n = connect.encode(&mut buf).unwrap();
        assert_eq!(buf[9], 0xC0);
        assert_eq!(&buf[n - 6..n], &[0x00, 0x01, b'u', 0x00, 0x01, b'p']);
    }

    #[test]
    fn connack_decodes_return_code() {
        let ack = ConnAck::decode(&[0x20, 0x02, 0x01, 0x05]).unwrap();
        assert!(ack.session_present);
        assert_eq!(ack.return_code, 5);
        assert!(ConnAck::decode(&[0x20, 0x01, 0x00]).is_err());
    }

    #[test]
    fn publish_qos0_decodes_topic_and_payload() {
        let frame = [0x30, 0x07, 0x00, 0x01, b't', b'a', b'b', b'c', b'd'];
        let publish = Publish::decode(&frame).unwrap();
        assert_eq!(publish.topic, "t");
        assert_eq!(publish.payload, b"abcd");
        assert_eq!(publish.qos, QoS::AtMostOnce);
        assert_eq!(publish.packet_id, None);
    }

    #[test]
    fn publish_qos1_carries_packet_id() {
        let mut buf = [0u8; 32];
        let outgoing = Publish {
            topic: "a/b",
            qos: QoS::AtLeastOnce,
            retain: true,
            payload: b"x",
            packet_id: Some(7),
        };
        let n = outgoing.encode(&mut buf).unwrap();
        assert_eq!(Publish::decode(&buf[..n]).unwrap(), outgoing);
    }

    #[test]
    fn publish_rejects_invalid_qos_bits() {
        let frame = [0x36, 0x03, 0x00, 0x01, b't'];
        assert_eq!(
            Publish::decode(&frame),
            Err(CodecError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn subscribe_frame_layout() {
        let mut buf = [0u8; 32];
        let n = Subscribe::new(1, "emqx/esp32", QoS::AtMostOnce)
            .encode(&mut buf)
            .unwrap();
        let mut expected = [0u8; 17];
        expected[..6].copy_from_slice(&[0x82, 15, 0x00, 0x01, 0x00, 10]);
        expected[6..16].copy_from_slice(b"emqx/esp32");
        expected[16] = 0;
        assert_eq!(&buf[..n], &expected);
    }

    #[test]
    fn suback_reports_failure_codes() {
        let ack = SubAck::decode(&[0x90, 0x04, 0x00, 0x09, 0x00, 0x80]).unwrap();
        assert_eq!(ack.packet_id, 9);
        assert_eq!(ack.return_codes.as_slice(), &[0x00, 0x80]);
        assert!(ack.has_failure());
    }

    #[test]
    fn decode_dispatches_on_packet_type() {
        assert!(matches!(decode(&[0xD0, 0x00]), Ok(MqttPacket::PingResp)));
        assert_eq!(
            decode(&[0x40, 0x02, 0x00, 0x03]).err(),
            Some(CodecError::Protocol(ProtocolError::InvalidPacketType(4)))
        );
        assert_eq!(
            decode(&[0xF0, 0x00]).err(),
            Some(CodecError::Protocol(ProtocolError::InvalidPacketType(15)))
        );
    }

    #[test]
    fn puback_frame_layout() {
        let mut buf = [0u8; 4];
        let n = PubAck { packet_id: 0x0102 }.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x40, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn small_buffers_are_reported() {
        let mut buf = [0u8; 8];
        let err = Subscribe::new(1, "a/long/topic", QoS::AtMostOnce).encode(&mut buf);
        assert_eq!(err, Err(CodecError::BufferTooSmall));
    }
}
