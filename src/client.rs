//! # MQTT Client
//!
//! A subscribing MQTT v3.1.1 client over any [`MqttTransport`]. The client owns
//! fixed-size receive and transmit buffers; incoming frames are assembled across
//! partial reads and handed out by [`MqttClient::poll`] as borrowed events.
//!
//! ```ignore
//! let options = MqttOptions::new("esp32-monitor", "test.mosquitto.org", 1883);
//! let mut client = MqttClient::<_, 4, 1024>::new(transport, options);
//!
//! client.connect().await?;
//! client.subscribe("emqx/esp32", QoS::AtMostOnce).await?;
//!
//! loop {
//!     if let Some(MqttEvent::Publish(msg)) = client.poll().await? {
//!         // msg.payload borrows the client's receive buffer
//!     }
//! }
//! ```

use embassy_time::{Duration, Instant, with_deadline, with_timeout};
use heapless::Vec;

use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish, QoS, SubAck,
    Subscribe,
};
use crate::transport::MqttTransport;
use crate::util::{announced_len, frame_len};

/// Keep-alive interval used when none is configured, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;

/// How long `connect` waits for CONNACK by default.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection options for [`MqttClient`].
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    host: &'a str,
    port: u16,
    keep_alive_secs: u16,
    clean_session: bool,
    username: Option<&'a str>,
    password: Option<&'a [u8]>,
    subscribe_qos: QoS,
    response_timeout: Duration,
}

impl<'a> MqttOptions<'a> {
    /// Creates options for `client_id` connecting to `host:port` with a
    /// 60 second keep-alive, a clean session and QoS 0 subscriptions.
    pub fn new(client_id: &'a str, host: &'a str, port: u16) -> Self {
        Self {
            client_id,
            host,
            port,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
            username: None,
            password: None,
            subscribe_qos: QoS::AtMostOnce,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Sets the keep-alive interval. `0` disables keep-alive pings.
    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    /// Sets the QoS requested for subscriptions.
    ///
    /// QoS 2 needs a PUBREC/PUBREL exchange the client does not implement, so
    /// it is downgraded to QoS 1.
    pub fn with_subscribe_qos(mut self, qos: QoS) -> Self {
        self.subscribe_qos = match qos {
            QoS::ExactlyOnce => QoS::AtLeastOnce,
            other => other,
        };
        self
    }

    /// Sets how long `connect` waits for the broker's CONNACK.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn client_id(&self) -> &'a str {
        self.client_id
    }

    pub fn host(&self) -> &'a str {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs as u64)
    }

    pub fn subscribe_qos(&self) -> QoS {
        self.subscribe_qos
    }
}

/// Events surfaced by [`MqttClient::poll`].
#[derive(Debug)]
pub enum MqttEvent<'a> {
    /// An application message; borrows the client's receive buffer.
    Publish(Publish<'a>),
    /// The broker answered a SUBSCRIBE.
    SubAck(SubAck),
}

/// A subscribing MQTT v3.1.1 client.
///
/// # Type Parameters
///
/// - `MAX_TOPICS`: Maximum number of SUBSCRIBE requests awaiting a SUBACK
/// - `BUF_SIZE`: Size of each of the receive and transmit buffers; incoming
///   frames larger than this are read off the stream and dropped with a warning
pub struct MqttClient<'a, T, const MAX_TOPICS: usize, const BUF_SIZE: usize>
where
    T: MqttTransport,
{
    transport: T,
    options: MqttOptions<'a>,
    rx: [u8; BUF_SIZE],
    rx_len: usize,
    /// Length of the frame handed out by the previous `poll`, dropped on the next call.
    consumed: usize,
    tx: [u8; BUF_SIZE],
    next_packet_id: u16,
    connected: bool,
    last_tx: Instant,
    ping_sent_at: Option<Instant>,
    pending_subacks: Vec<u16, MAX_TOPICS>,
}

impl<'a, T, const MAX_TOPICS: usize, const BUF_SIZE: usize> MqttClient<'a, T, MAX_TOPICS, BUF_SIZE>
where
    T: MqttTransport,
{
    pub fn new(transport: T, options: MqttOptions<'a>) -> Self {
        Self {
            transport,
            options,
            rx: [0; BUF_SIZE],
            rx_len: 0,
            consumed: 0,
            tx: [0; BUF_SIZE],
            next_packet_id: 1,
            connected: false,
            last_tx: Instant::now(),
            ping_sent_at: None,
            pending_subacks: Vec::new(),
        }
    }

    pub fn options(&self) -> &MqttOptions<'a> {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of SUBSCRIBE requests not yet acknowledged.
    pub fn pending_subscriptions(&self) -> usize {
        self.pending_subacks.len()
    }

    /// Performs the CONNECT/CONNACK handshake.
    ///
    /// Returns the broker's code on acceptance and
    /// `MqttError::ConnectionRefused` carrying the code otherwise.
    pub async fn connect(&mut self) -> Result<ConnectReasonCode, MqttError<T::Error>> {
        let mut connect = Connect::new(
            self.options.client_id,
            self.options.keep_alive_secs,
            self.options.clean_session,
        );
        connect.username = self.options.username;
        connect.password = self.options.password;

        let n = connect.encode(&mut self.tx)?;
        self.send(n).await?;
        debug!("CONNECT sent as {}", self.options.client_id);

        let len = with_timeout(self.options.response_timeout, self.read_frame())
            .await
            .map_err(|_| MqttError::Timeout)??;
        self.consumed = len;

        let ack = match packet::decode(&self.rx[..len])? {
            MqttPacket::ConnAck(ack) => ack,
            _ => return Err(ProtocolError::InvalidResponse.into()),
        };

        let code = ConnectReasonCode::from(ack.return_code);
        if !code.is_success() {
            return Err(MqttError::ConnectionRefused(code));
        }

        self.connected = true;
        self.ping_sent_at = None;
        self.pending_subacks.clear();
        Ok(code)
    }

    /// Sends a SUBSCRIBE for a single topic filter and returns its packet id.
    ///
    /// The matching SUBACK is delivered through [`poll`](Self::poll).
    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, MqttError<T::Error>> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }
        let packet_id = self.next_packet_id();
        let n = Subscribe::new(packet_id, topic, qos).encode(&mut self.tx)?;
        self.send(n).await?;
        if self.pending_subacks.push(packet_id).is_err() {
            warn!("SUBACK tracking full; packet {} will not be tracked", packet_id);
        }
        Ok(packet_id)
    }

    /// Waits for the next incoming packet or keep-alive deadline.
    ///
    /// Returns `Ok(None)` for traffic the client handles itself (PINGREQ sent,
    /// PINGRESP received). QoS 1 publishes are acknowledged before they are
    /// returned.
    pub async fn poll(&mut self) -> Result<Option<MqttEvent<'_>>, MqttError<T::Error>> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }
        self.compact();

        let len = match frame_len(&self.rx[..self.rx_len])? {
            Some(len) => len,
            None => match with_deadline(self.keep_alive_deadline(), self.read_frame()).await {
                Ok(res) => res?,
                Err(_) => {
                    self.keep_alive_expired().await?;
                    return Ok(None);
                }
            },
        };
        self.consumed = len;

        match packet::decode(&self.rx[..len])? {
            MqttPacket::Publish(publish) => {
                if publish.qos != QoS::AtMostOnce
                    && let Some(packet_id) = publish.packet_id
                {
                    let n = PubAck { packet_id }.encode(&mut self.tx)?;
                    self.transport
                        .send(&self.tx[..n])
                        .await
                        .map_err(MqttError::Transport)?;
                    self.last_tx = Instant::now();
                }
                trace!("PUBLISH on {} ({} bytes)", publish.topic, publish.payload.len());
                Ok(Some(MqttEvent::Publish(publish)))
            }
            MqttPacket::SubAck(ack) => {
                self.pending_subacks.retain(|&id| id != ack.packet_id);
                Ok(Some(MqttEvent::SubAck(ack)))
            }
            MqttPacket::PingResp => {
                trace!("PINGRESP");
                self.ping_sent_at = None;
                Ok(None)
            }
            MqttPacket::ConnAck(_) => Err(ProtocolError::InvalidResponse.into()),
        }
    }

    /// Sends DISCONNECT if connected, then closes the transport.
    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        let n = Disconnect.encode(&mut self.tx)?;
        self.send(n).await?;
        debug!("DISCONNECT sent");
        self.transport.close().await.map_err(MqttError::Transport)
    }

    async fn send(&mut self, len: usize) -> Result<(), MqttError<T::Error>> {
        self.transport
            .send(&self.tx[..len])
            .await
            .map_err(MqttError::Transport)?;
        self.last_tx = Instant::now();
        Ok(())
    }

    /// Reads until the receive buffer starts with a complete frame and returns its length.
    ///
    /// Frames announcing more than `BUF_SIZE` bytes are skipped.
    async fn read_frame(&mut self) -> Result<usize, MqttError<T::Error>> {
        self.compact();
        loop {
            if let Some(len) = frame_len(&self.rx[..self.rx_len])? {
                return Ok(len);
            }
            if let Some(total) = announced_len(&self.rx[..self.rx_len])?
                && total > BUF_SIZE
            {
                self.discard_frame(total).await?;
                continue;
            }
            if self.rx_len == BUF_SIZE {
                return Err(MqttError::BufferTooSmall);
            }
            self.fill().await?;
        }
    }

    /// Drops a frame of `total` bytes whose head is at the start of the
    /// receive buffer, keeping whatever follows it.
    async fn discard_frame(&mut self, total: usize) -> Result<(), MqttError<T::Error>> {
        warn!("Dropping {}-byte packet, receive buffer holds {}", total, BUF_SIZE);
        let mut remaining = total;
        loop {
            let skip = remaining.min(self.rx_len);
            self.rx.copy_within(skip..self.rx_len, 0);
            self.rx_len -= skip;
            remaining -= skip;
            if remaining == 0 {
                return Ok(());
            }
            self.fill().await?;
        }
    }

    /// Appends one read from the transport to the receive buffer.
    async fn fill(&mut self) -> Result<(), MqttError<T::Error>> {
        let n = self
            .transport
            .recv(&mut self.rx[self.rx_len..])
            .await
            .map_err(MqttError::Transport)?;
        if n == 0 {
            self.connected = false;
            return Err(ProtocolError::ConnectionClosed.into());
        }
        self.rx_len += n;
        Ok(())
    }

    /// Drops the frame returned by the previous call from the receive buffer.
    fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.rx.copy_within(self.consumed..self.rx_len, 0);
        self.rx_len -= self.consumed;
        self.consumed = 0;
    }

    fn keep_alive_deadline(&self) -> Instant {
        let keep_alive = self.options.keep_alive();
        if keep_alive == Duration::from_secs(0) {
            return Instant::MAX;
        }
        match self.ping_sent_at {
            Some(sent) => sent + keep_alive,
            None => self.last_tx + keep_alive,
        }
    }

    async fn keep_alive_expired(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.ping_sent_at.is_some() {
            warn!("No PINGRESP within keep-alive; dropping connection");
            self.connected = false;
            return Err(MqttError::Timeout);
        }
        let n = PingReq.encode(&mut self.tx)?;
        self.send(n).await?;
        self.ping_sent_at = Some(self.last_tx);
        trace!("PINGREQ sent");
        Ok(())
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }
}
