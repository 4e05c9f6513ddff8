//! XDR encoding/decoding for handshake procedure arguments (RFC 4506)

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ClientError, Result};

/// XDR encoder for procedure arguments.
pub struct XdrEncoder {
    buf: BytesMut,
}

impl XdrEncoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn encode_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn encode_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn encode_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn encode_bool(&mut self, v: bool) {
        self.encode_u32(u32::from(v));
    }

    /// Fixed-length opaque data, padded to a 4-byte boundary.
    pub fn encode_opaque_fixed(&mut self, data: &[u8]) {
        let padding = (4 - (data.len() % 4)) % 4;
        self.buf.extend_from_slice(data);
        self.buf.put_bytes(0, padding);
    }

    pub fn encode_opaque_variable(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| ClientError::Encode {
            reason: format!("opaque of {} bytes exceeds XDR length", data.len()),
        })?;
        self.encode_u32(len);
        self.encode_opaque_fixed(data);
        Ok(())
    }

    pub fn encode_string(&mut self, s: &str) -> Result<()> {
        self.encode_opaque_variable(s.as_bytes())
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for XdrEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// XDR decoder over a borrowed reply buffer.
pub struct XdrDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> XdrDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ClientError::decode("truncated data"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn decode_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn decode_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn decode_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn decode_bool(&mut self) -> Result<bool> {
        match self.decode_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ClientError::decode(format!("invalid XDR bool {}", other))),
        }
    }

    /// Returns the byte range of the next variable-length opaque, so callers
    /// can slice the original buffer without copying.
    pub fn decode_opaque_range(&mut self) -> Result<Range<usize>> {
        let len = self.decode_u32()? as usize;
        let start = self.pos;
        let padding = (4 - (len % 4)) % 4;
        let total = len
            .checked_add(padding)
            .ok_or_else(|| ClientError::decode("opaque length overflow"))?;
        self.take(total)?;
        Ok(start..start + len)
    }

    pub fn decode_opaque_variable(&mut self) -> Result<Vec<u8>> {
        let range = self.decode_opaque_range()?;
        Ok(self.buf[range].to_vec())
    }

    pub fn decode_string(&mut self) -> Result<String> {
        let data = self.decode_opaque_variable()?;
        String::from_utf8(data).map_err(|e| ClientError::decode(format!("invalid UTF-8: {}", e)))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_u32_big_endian() {
        let mut enc = XdrEncoder::new();
        enc.encode_u32(0x12345678);
        let buf = enc.finish();
        assert_eq!(&buf[..], &[0x12, 0x34, 0x56, 0x78]);

        let mut dec = XdrDecoder::new(&buf);
        assert_eq!(dec.decode_u32().unwrap(), 0x12345678);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_negative_i32() {
        let mut enc = XdrEncoder::new();
        enc.encode_i32(-1);
        let buf = enc.finish();
        assert_eq!(&buf[..], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(XdrDecoder::new(&buf).decode_i32().unwrap(), -1);
    }

    #[test]
    fn test_string_is_padded() {
        let mut enc = XdrEncoder::new();
        enc.encode_string("abcde").unwrap();
        let buf = enc.finish();
        assert_eq!(buf.len(), 4 + 8);
        assert_eq!(&buf[4..9], b"abcde");
        assert_eq!(&buf[9..12], &[0, 0, 0]);

        let mut dec = XdrDecoder::new(&buf);
        assert_eq!(dec.decode_string().unwrap(), "abcde");
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_opaque_range_points_into_buffer() {
        let mut enc = XdrEncoder::new();
        enc.encode_u32(7);
        enc.encode_opaque_variable(b"volume").unwrap();
        let buf = enc.finish();

        let mut dec = XdrDecoder::new(&buf);
        dec.decode_u32().unwrap();
        let range = dec.decode_opaque_range().unwrap();
        assert_eq!(&buf[range], b"volume");
    }

    #[test]
    fn test_truncated_opaque_fails() {
        let mut enc = XdrEncoder::new();
        enc.encode_u32(100);
        enc.encode_opaque_fixed(b"abc");
        let buf = enc.finish();

        let result = XdrDecoder::new(&buf).decode_opaque_variable();
        assert!(matches!(result, Err(ClientError::Decode { .. })));
    }

    #[test]
    fn test_huge_length_does_not_overflow() {
        let buf = [0xff, 0xff, 0xff, 0xff];
        assert!(XdrDecoder::new(&buf).decode_opaque_range().is_err());
    }

    #[test]
    fn test_invalid_bool() {
        let mut enc = XdrEncoder::new();
        enc.encode_u32(2);
        let buf = enc.finish();
        assert!(XdrDecoder::new(&buf).decode_bool().is_err());
    }
}
