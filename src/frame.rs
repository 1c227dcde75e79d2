//! Provides a type representing a message frame on either socket as well as
//! utilities for parsing frames from a byte array.
//!
//! Every message carries a fixed-width ASCII header: two digits of property,
//! two digits of color, and the payload length in decimal, left-aligned and
//! space-padded to [`HEADER_SIZE`] bytes. File payloads use a separate
//! single-shot header of [`FILE_HEADER_SIZE`] bytes carrying only the length.

use crate::datatypes::Attr;
use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error;

/// Bytes prepended to a message for the header.
pub const HEADER_SIZE: usize = 8;

/// Bytes prepended to a file stream to specify its size.
pub const FILE_HEADER_SIZE: usize = 10;

/// Largest payload whose length still prints in the `HEADER_SIZE - 4`
/// digits left after the attribute fields.
pub const MAX_PAYLOAD: usize = 9_999;

/// Chunk size for streaming file payloads.
pub const FILE_BUFFER: usize = 1024;

/// A single attribute-tagged message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
    pub attr: Attr,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Not enough data is available to parse a message.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The header contained something other than attribute digits and a
    /// space-padded decimal length.
    #[error("corrupt frame header: {0}")]
    CorruptHeader(String),

    /// The payload length does not fit in the header's length field.
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    TooLarge { len: usize, max: usize },
}

impl Frame {
    /// Build a frame around a UTF-8 message.
    pub fn text(msg: &str, attr: Attr) -> Frame {
        Frame {
            payload: Bytes::copy_from_slice(msg.as_bytes()),
            attr,
        }
    }

    /// Borrow the payload as UTF-8 text.
    pub fn as_text(&self) -> crate::Result<&str> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// Checks if an entire message can be decoded from `src`. On success,
    /// returns the total length of the frame (header plus payload) so the
    /// caller can advance past it after parsing.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<usize, Error> {
        if src.remaining() < HEADER_SIZE {
            return Err(Error::Incomplete);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&src.chunk()[..HEADER_SIZE]);
        let (_, len) = parse_header(&header)?;

        let total = HEADER_SIZE + len;
        if src.remaining() < total {
            return Err(Error::Incomplete);
        }
        Ok(total)
    }

    /// The message has already been validated with `check`.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        if src.remaining() < HEADER_SIZE {
            return Err(Error::Incomplete);
        }

        let mut header = [0u8; HEADER_SIZE];
        src.copy_to_slice(&mut header);
        let (attr, len) = parse_header(&header)?;

        if src.remaining() < len {
            return Err(Error::Incomplete);
        }
        let payload = Bytes::copy_from_slice(&src.chunk()[..len]);
        src.advance(len);

        Ok(Frame { payload, attr })
    }

    /// Encode a payload and its attribute pair into wire bytes.
    ///
    /// Fails before anything is written when the payload length does not
    /// fit in the header's length field.
    pub fn encode(payload: &[u8], attr: Attr) -> Result<Bytes, Error> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::TooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let header = format!(
            "{:<width$}",
            format!("{:0>2}{:0>2}{}", attr.property, attr.color, payload.len()),
            width = HEADER_SIZE
        );

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(payload);
        Ok(buf.freeze())
    }
}

/// Split a raw header into its attribute pair and payload length.
///
/// The attribute fields are exactly two ASCII digits each. The length field
/// is ASCII digits, optionally padded with ASCII spaces; any other byte is
/// a corrupt header.
fn parse_header(raw: &[u8; HEADER_SIZE]) -> Result<(Attr, usize), Error> {
    let property = two_digits(&raw[0..2])?;
    let color = two_digits(&raw[2..4])?;

    let field: &[u8] = &raw[4..];
    let trimmed = trim_spaces(field);
    if trimmed.is_empty() || !trimmed.iter().all(u8::is_ascii_digit) {
        return Err(Error::CorruptHeader(format!(
            "invalid length field {:?}",
            String::from_utf8_lossy(field)
        )));
    }
    // Digits only at this point, so UTF-8 and overflow are the only hazards
    let len = std::str::from_utf8(trimmed)
        .expect("ascii digits")
        .parse::<usize>()
        .map_err(|e| Error::CorruptHeader(e.to_string()))?;

    Ok((Attr::new(property, color), len))
}

fn two_digits(field: &[u8]) -> Result<u8, Error> {
    match field {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => Ok((a - b'0') * 10 + (b - b'0')),
        _ => Err(Error::CorruptHeader(format!(
            "invalid attribute field {:?}",
            String::from_utf8_lossy(field)
        ))),
    }
}

fn trim_spaces(mut field: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = field {
        field = rest;
    }
    while let [rest @ .., b' '] = field {
        field = rest;
    }
    field
}

/// Encode the single-shot file header: the total size in ASCII decimal,
/// left-aligned and space-padded.
pub fn encode_file_header(size: u64) -> Result<[u8; FILE_HEADER_SIZE], Error> {
    let digits = size.to_string();
    if digits.len() > FILE_HEADER_SIZE {
        return Err(Error::TooLarge {
            len: size as usize,
            max: usize::MAX,
        });
    }
    let mut header = [b' '; FILE_HEADER_SIZE];
    header[..digits.len()].copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Header a sender emits in place of a real one when it cannot deliver the
/// advertised file. Receivers treat the zero size as a failed transfer.
pub fn abort_file_header() -> [u8; FILE_HEADER_SIZE] {
    let mut header = [b' '; FILE_HEADER_SIZE];
    header[0] = b'0';
    header
}

/// Parse a file header into the advertised size. A size of zero is the
/// sender's failure signal and is returned as-is for the caller to act on.
pub fn parse_file_header(raw: &[u8; FILE_HEADER_SIZE]) -> Result<u64, Error> {
    let trimmed = trim_spaces(raw);
    if trimmed.is_empty() || !trimmed.iter().all(u8::is_ascii_digit) {
        return Err(Error::CorruptHeader(format!(
            "invalid file length field {:?}",
            String::from_utf8_lossy(raw)
        )));
    }
    std::str::from_utf8(trimmed)
        .expect("ascii digits")
        .parse::<u64>()
        .map_err(|e| Error::CorruptHeader(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &[u8], attr: Attr) -> Frame {
        let encoded = Frame::encode(payload, attr).unwrap();
        let mut cursor = Cursor::new(&encoded[..]);
        let total = Frame::check(&mut cursor).unwrap();
        assert_eq!(total, encoded.len());
        cursor.set_position(0);
        Frame::parse(&mut cursor).unwrap()
    }

    #[test]
    fn frame_roundtrip_preserves_payload_and_attr() {
        let attr = Attr::new(3, 7);
        let frame = roundtrip(b"hello there", attr);
        assert_eq!(&frame.payload[..], b"hello there");
        assert_eq!(frame.attr, attr);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let frame = roundtrip(b"", Attr::DYNAMIC);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.attr, Attr::DYNAMIC);
    }

    #[test]
    fn attrs_are_zero_padded_in_the_header() {
        let encoded = Frame::encode(b"x", Attr::new(1, 5)).unwrap();
        assert_eq!(&encoded[..HEADER_SIZE], b"01051   ");
    }

    #[test]
    fn oversized_payload_is_rejected_before_encoding() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            Frame::encode(&payload, Attr::DYNAMIC),
            Err(Error::TooLarge { .. })
        ));
    }

    #[test]
    fn max_payload_still_encodes() {
        let payload = vec![b'a'; MAX_PAYLOAD];
        let frame = roundtrip(&payload, Attr::STANDARD);
        assert_eq!(frame.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn check_reports_incomplete_for_short_input() {
        let encoded = Frame::encode(b"partial", Attr::DYNAMIC).unwrap();
        for cut in 0..encoded.len() {
            let mut cursor = Cursor::new(&encoded[..cut]);
            assert!(matches!(Frame::check(&mut cursor), Err(Error::Incomplete)));
        }
    }

    #[test]
    fn non_digit_attribute_bytes_are_corrupt() {
        let mut raw = Frame::encode(b"ok", Attr::DYNAMIC).unwrap().to_vec();
        raw[1] = b'x';
        let mut cursor = Cursor::new(&raw[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn stray_byte_in_length_field_is_corrupt() {
        // "0002 2 " style interior garbage
        let raw = b"00022 x fill";
        let mut cursor = Cursor::new(&raw[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn file_header_roundtrip() {
        let header = encode_file_header(123_456).unwrap();
        assert_eq!(&header, b"123456    ");
        assert_eq!(parse_file_header(&header).unwrap(), 123_456);
    }

    #[test]
    fn abort_header_parses_to_zero() {
        assert_eq!(parse_file_header(&abort_file_header()).unwrap(), 0);
    }

    #[test]
    fn file_header_rejects_garbage() {
        let raw = *b"12ab56    ";
        assert!(parse_file_header(&raw).is_err());
    }
}
