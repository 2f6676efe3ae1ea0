//! Field-level wire codec for message payloads
//!
//! A payload is a flat sequence of fields with no tags, padding or version
//! marker. Fields must be read back in exactly the order they were appended.
//!
//! ```text
//! i32 / i64 / f32   little-endian, fixed width
//! string            u64 little-endian byte length, then UTF-8 bytes
//! Vec3              x, y, z as f32
//! Quat              x, y, z, w as f32
//! ```
//!
//! Both directions go through bincode with fixed-int little-endian options,
//! which yields exactly the layout above. Reads are bounded by the bytes left
//! in the payload, so a corrupt length prefix surfaces as
//! [`DecodeError::Truncated`] instead of a huge allocation.

use crate::{Quat, Vec3};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while reading a payload. Any of these drops the message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload ended before all fields were read")]
    Truncated,
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown {kind} value {value}")]
    UnknownVariant { kind: &'static str, value: i32 },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<bincode::Error> for DecodeError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::SizeLimit => DecodeError::Truncated,
            bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                DecodeError::Truncated
            }
            bincode::ErrorKind::InvalidUtf8Encoding(_) => DecodeError::InvalidUtf8,
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

/// Error raised when a field could not be appended to a payload.
#[derive(Debug, Error)]
#[error("failed to encode payload: {0}")]
pub struct EncodeError(#[from] bincode::Error);

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Appends fields to an outgoing payload.
///
/// Writes are chainable; the first failure is remembered and reported by
/// [`PayloadWriter::finish`].
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
    error: Option<bincode::Error>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.append(&value)
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.append(&value)
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.append(&value)
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.append(&value)
    }

    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.append(value)
    }

    pub fn write_vec3(&mut self, value: Vec3) -> &mut Self {
        self.append(&value)
    }

    pub fn write_quat(&mut self, value: Quat) -> &mut Self {
        self.append(&value)
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the finished payload, or the first error hit while writing.
    pub fn finish(&mut self) -> Result<Vec<u8>, EncodeError> {
        match self.error.take() {
            Some(err) => Err(EncodeError(err)),
            None => Ok(std::mem::take(&mut self.buf)),
        }
    }

    fn append<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        if self.error.is_none() {
            if let Err(err) = wire_options().serialize_into(&mut self.buf, value) {
                self.error = Some(err);
            }
        }
        self
    }
}

/// Reads fields from an incoming payload in append order.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    rest: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.read()
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.read()
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.read()
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.read()
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read()
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        self.read()
    }

    pub fn read_quat(&mut self) -> Result<Quat, DecodeError> {
        self.read()
    }

    fn read<T: DeserializeOwned>(&mut self) -> Result<T, DecodeError> {
        let limit = self.rest.len() as u64;
        let value = wire_options()
            .with_limit(limit)
            .deserialize_from(&mut self.rest)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_fields_read_back_in_append_order() {
        let payload = PayloadWriter::new()
            .write_u8(7)
            .write_i64(-42)
            .write_i32(12)
            .write_str("player3")
            .write_vec3(Vec3::new(1.0, 2.0, 3.0))
            .write_quat(Quat::new(0.0, 0.5, 0.0, 0.5))
            .finish()
            .unwrap();

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert_eq!(reader.read_i32().unwrap(), 12);
        assert_eq!(reader.read_string().unwrap(), "player3");

        let v = reader.read_vec3().unwrap();
        assert_approx_eq!(v.x, 1.0);
        assert_approx_eq!(v.y, 2.0);
        assert_approx_eq!(v.z, 3.0);

        let q = reader.read_quat().unwrap();
        assert_approx_eq!(q.y, 0.5);
        assert_approx_eq!(q.w, 0.5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_layout_is_little_endian_fixed_width() {
        let payload = PayloadWriter::new()
            .write_u8(0x86)
            .write_i64(1)
            .write_str("ab")
            .write_f32(1.0)
            .finish()
            .unwrap();

        let mut expected = vec![0x86];
        expected.extend_from_slice(&1i64.to_le_bytes());
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(b"ab");
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_vec3_is_three_floats() {
        let payload = PayloadWriter::new()
            .write_vec3(Vec3::new(1.0, 2.0, 3.0))
            .finish()
            .unwrap();
        assert_eq!(payload.len(), 12);
        assert_eq!(&payload[4..8], &2.0f32.to_le_bytes());
    }

    #[test]
    fn test_reading_past_end_is_truncated() {
        let payload = PayloadWriter::new().write_i32(5).finish().unwrap();
        let mut reader = PayloadReader::new(&payload);
        assert!(matches!(reader.read_i64(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_oversized_string_prefix_is_truncated() {
        let mut payload = u64::MAX.to_le_bytes().to_vec();
        payload.extend_from_slice(b"abc");
        let mut reader = PayloadReader::new(&payload);
        assert!(matches!(reader.read_string(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_invalid_utf8_string() {
        let mut payload = 2u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        let mut reader = PayloadReader::new(&payload);
        assert!(matches!(reader.read_string(), Err(DecodeError::InvalidUtf8)));
    }

    #[test]
    fn test_empty_payload() {
        let mut reader = PayloadReader::new(&[]);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_writer_length_tracking() {
        let mut writer = PayloadWriter::new();
        assert!(writer.is_empty());
        writer.write_i32(1).write_i64(2);
        assert_eq!(writer.len(), 12);
    }
}
