//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the underlying
//! communication channel (like TCP, UART, etc.), allowing the MQTT client to be
//! hardware and network-stack agnostic.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

/// A trait representing a transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the stream.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Ends the stream once pending data is delivered.
    ///
    /// Dropping a transport is not guaranteed to notify the peer.
    async fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Errors raised by [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpTransportError {
    /// The broker host name did not resolve to an address.
    Dns,
    /// The TCP handshake with the broker failed.
    Connect(ConnectError),
    /// A read or write on the established socket failed.
    Io(TcpError),
    /// A write did not complete within the transport timeout.
    Timeout,
}

/// TCP transport implementation using `embassy-net`.
///
/// Reads block until data arrives; the client layers keep-alive timing on
/// top. Writes are bounded by `timeout`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Wraps an already connected socket.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// Resolves `host` and opens a TCP connection to the broker on `port`.
    ///
    /// IP literals are used as-is; names go through the stack's DNS resolver.
    pub async fn connect(
        stack: Stack<'_>,
        mut socket: TcpSocket<'a>,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, TcpTransportError> {
        let addrs = stack.dns_query(host, DnsQueryType::A).await.map_err(|_e| {
            warn!("DNS lookup for {} failed: {:?}", host, _e);
            TcpTransportError::Dns
        })?;
        let addr = *addrs.first().ok_or(TcpTransportError::Dns)?;

        debug!("Connecting to {}:{}", host, port);
        socket
            .connect((addr, port))
            .await
            .map_err(TcpTransportError::Connect)?;
        info!("TCP connection to {}:{} established", host, port);

        Ok(Self::new(socket, timeout))
    }

    async fn write_with_timeout(&mut self, buf: &[u8]) -> Result<(), TcpTransportError> {
        let timer = Timer::after(self.timeout);
        let write = async {
            self.socket.write_all(buf).await?;
            // Flush to ensure data is actually sent to the network
            self.socket.flush().await
        };

        match futures::future::select(core::pin::pin!(write), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(()), _)) => Ok(()),
            futures::future::Either::Left((Err(e), _)) => {
                warn!("TCP write error: {:?}", e);
                Err(TcpTransportError::Io(e))
            }
            futures::future::Either::Right(((), _)) => {
                warn!("TCP write timeout");
                Err(TcpTransportError::Timeout)
            }
        }
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpTransportError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX {} bytes", buf.len());
        self.write_with_timeout(buf).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.socket.read(buf).await.map_err(TcpTransportError::Io)?;
        if n == 0 {
            debug!("TCP connection closed by peer");
        }
        Ok(n)
    }

    /// Sends FIN and waits, bounded by the transport timeout, for the peer to
    /// acknowledge it. The socket is aborted if that wait times out.
    async fn close(&mut self) -> Result<(), Self::Error> {
        self.socket.close();
        let timer = Timer::after(self.timeout);
        let flushed = match futures::future::select(
            core::pin::pin!(self.socket.flush()),
            core::pin::pin!(timer),
        )
        .await
        {
            futures::future::Either::Left((res, _)) => Some(res),
            futures::future::Either::Right(((), _)) => None,
        };

        match flushed {
            Some(Ok(())) => {
                debug!("TCP connection closed");
                Ok(())
            }
            Some(Err(e)) => Err(TcpTransportError::Io(e)),
            None => {
                warn!("TCP close timeout, aborting");
                self.socket.abort();
                Err(TcpTransportError::Timeout)
            }
        }
    }
}
