//! In-memory transport and frame builders for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::packet::{EncodePacket, Publish, QoS};
use crate::transport::MqttTransport;

pub const CONNECT: u8 = 0x10;
pub const SUBSCRIBE: u8 = 0x82;
pub const PINGREQ: u8 = 0xC0;
pub const DISCONNECT: u8 = 0xE0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptError;

/// Frames written by the client, shared with the test body.
#[derive(Clone, Default)]
pub struct SentLog {
    frames: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: Rc<Cell<bool>>,
}

impl SentLog {
    /// Number of sent frames whose first byte is `header`.
    pub fn count(&self, header: u8) -> usize {
        self.frames
            .borrow()
            .iter()
            .filter(|f| f.first() == Some(&header))
            .count()
    }

    pub fn last(&self) -> Option<Vec<u8>> {
        self.frames.borrow().last().cloned()
    }

    /// Whether the client closed the transport.
    pub fn closed(&self) -> bool {
        self.closed.get()
    }
}

/// Replays inbound chunks in order and records outbound frames.
///
/// Once the script is drained `recv` reports a closed stream, or never
/// completes after [`hang_when_drained`](Self::hang_when_drained).
pub struct ScriptedTransport {
    inbound: VecDeque<Vec<u8>>,
    sent: SentLog,
    hang: bool,
}

impl ScriptedTransport {
    pub fn new<I>(inbound: I) -> (Self, SentLog)
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let sent = SentLog::default();
        let transport = Self {
            inbound: inbound.into_iter().collect(),
            sent: sent.clone(),
            hang: false,
        };
        (transport, sent)
    }

    pub fn hang_when_drained(mut self) -> Self {
        self.hang = true;
        self
    }
}

impl MqttTransport for ScriptedTransport {
    type Error = ScriptError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.sent.frames.borrow_mut().push(buf.to_vec());
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(mut chunk) = self.inbound.pop_front() else {
            if self.hang {
                core::future::pending::<()>().await;
            }
            return Ok(0);
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.inbound.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.sent.closed.set(true);
        Ok(())
    }
}

pub fn connack(code: u8) -> Vec<u8> {
    vec![0x20, 0x02, 0x00, code]
}

pub fn suback(packet_id: u16, code: u8) -> Vec<u8> {
    let [hi, lo] = packet_id.to_be_bytes();
    vec![0x90, 0x03, hi, lo, code]
}

pub fn pingresp() -> Vec<u8> {
    vec![0xD0, 0x00]
}

pub fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    encode(&Publish {
        topic,
        qos: QoS::AtMostOnce,
        retain: false,
        payload,
        packet_id: None,
    })
}

pub fn publish_qos1(topic: &str, packet_id: u16, payload: &[u8]) -> Vec<u8> {
    encode(&Publish {
        topic,
        qos: QoS::AtLeastOnce,
        retain: false,
        payload,
        packet_id: Some(packet_id),
    })
}

fn encode(packet: &impl EncodePacket) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let n = packet.encode(&mut buf).expect("test frame fits");
    buf.truncate(n);
    buf
}
