//! # Error Types
//!
//! Errors raised by the MQTT client and runtime, from transport failures to
//! broker refusals. Cache-level errors live next to the store in
//! [`crate::cache::StoreError`]; they never escape the message callback.

/// The primary error enum for the MQTT client.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport (e.g., TCP, UART).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred, indicating a violation of the MQTT specification.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The client is not currently connected to the broker.
    NotConnected,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// The broker did not answer within the configured window.
    Timeout,
}

impl<T> From<ProtocolError> for MqttError<T> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

impl<T> From<CodecError> for MqttError<T> {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Protocol(p) => MqttError::Protocol(p),
            CodecError::BufferTooSmall => MqttError::BufferTooSmall,
        }
    }
}

/// Errors produced by packet encoding and decoding.
///
/// Codec functions never touch the transport, so they return this narrower
/// type; the client lifts it into [`MqttError`] with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The bytes do not form a valid packet.
    Protocol(ProtocolError),
    /// The output buffer cannot hold the encoded packet.
    BufferTooSmall,
}

impl From<ProtocolError> for CodecError {
    fn from(err: ProtocolError) -> Self {
        CodecError::Protocol(err)
    }
}

/// Represents the return codes of a connection acknowledgment (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A code outside the MQTT v3.1.1 table.
    Other(u8),
}

impl ConnectReasonCode {
    /// Raw value as carried on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadUserNameOrPassword => 4,
            Self::NotAuthorized => 5,
            Self::Other(val) => val,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The server sent an invalid or unexpected response.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_maps_known_and_unknown_values() {
        assert_eq!(ConnectReasonCode::from(0), ConnectReasonCode::Success);
        assert_eq!(ConnectReasonCode::from(5), ConnectReasonCode::NotAuthorized);
        assert_eq!(ConnectReasonCode::from(42), ConnectReasonCode::Other(42));
        assert_eq!(ConnectReasonCode::from(4).code(), 4);
        assert!(!ConnectReasonCode::ServerUnavailable.is_success());
    }

    #[test]
    fn codec_errors_lift_into_mqtt_errors() {
        let err: MqttError<()> = CodecError::BufferTooSmall.into();
        assert_eq!(err, MqttError::BufferTooSmall);

        let err: MqttError<()> = CodecError::Protocol(ProtocolError::MalformedPacket).into();
        assert_eq!(err, MqttError::Protocol(ProtocolError::MalformedPacket));
    }
}
