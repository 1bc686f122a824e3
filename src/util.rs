//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT-specific data types from and to byte
//! buffers: variable-byte integers, length-prefixed strings and fixed headers.

use crate::error::{CodecError, ProtocolError};

/// Largest value a four-byte variable-byte integer can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// Returns `Ok(None)` when the buffer ends before the integer does, which lets
/// frame assembly wait for more bytes instead of failing.
pub fn read_variable_byte_integer(
    cursor: &mut usize,
    buf: &[u8],
) -> Result<Option<usize>, CodecError> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let Some(encoded_byte) = buf.get(*cursor + i) else {
            return Ok(None);
        };
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(ProtocolError::MalformedPacket.into());
        }
    }
    *cursor += i + 1;
    Ok(Some(value))
}

/// Writes a variable-byte integer at the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer(buf: &mut [u8], mut val: usize) -> Result<usize, CodecError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PayloadTooLarge.into());
    }
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(CodecError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, CodecError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, CodecError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(ProtocolError::MalformedPacket)?;
    let s = core::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8String)?;
    *cursor += len;
    Ok(s)
}

/// Writes a length-prefixed byte string at the start of `buf`, returning the byte count.
pub fn write_binary(buf: &mut [u8], data: &[u8]) -> Result<usize, CodecError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::PayloadTooLarge)?;
    let required_space = 2 + data.len();
    let slice = buf
        .get_mut(0..required_space)
        .ok_or(CodecError::BufferTooSmall)?;

    slice[0..2].copy_from_slice(&len.to_be_bytes());
    slice[2..].copy_from_slice(data);
    Ok(required_space)
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(buf: &mut [u8], s: &str) -> Result<usize, CodecError> {
    write_binary(buf, s.as_bytes())
}

/// Returns the total length announced by the fixed header at the start of `buf`.
///
/// `Ok(None)` means the fixed header itself is not complete yet.
pub fn announced_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = 1;
    let remaining = read_variable_byte_integer(&mut cursor, buf)?;
    Ok(remaining.map(|remaining| cursor + remaining))
}

/// Returns the total length of the first complete frame in `buf`.
///
/// `Ok(None)` means the buffer holds only part of a frame.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    Ok(announced_len(buf)?.filter(|&total| buf.len() >= total))
}
