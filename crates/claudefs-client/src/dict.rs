//! Option bag exchanged in SETVOLUME requests and replies.
//!
//! Wire layout: `u32 count`, then per pair `u32 keylen, u32 vallen, key, NUL, value`.
//! Values are NUL-terminated and `vallen` counts the terminator. Integers
//! travel as decimal strings.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ClientError, Result};

/// Upper bound on pairs accepted from the wire.
const MAX_PAIRS: u32 = 1 << 16;

/// Ordered string key/value option bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionBag {
    entries: BTreeMap<String, String>,
}

impl OptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn set_i32(&mut self, key: &str, value: i32) {
        self.set_str(key, value.to_string());
    }

    pub fn set_u32(&mut self, key: &str, value: u32) {
        self.set_str(key, value.to_string());
    }

    pub fn set_u64(&mut self, key: &str, value: u64) {
        self.set_str(key, value.to_string());
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key).and_then(|v| v.parse().ok())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get_str(key).and_then(|v| v.parse().ok())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn serialized_len(&self) -> usize {
        4 + self
            .entries
            .iter()
            .map(|(k, v)| 8 + k.len() + 1 + v.len() + 1)
            .sum::<usize>()
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let count = u32::try_from(self.entries.len()).map_err(|_| ClientError::Encode {
            reason: "too many options".to_string(),
        })?;
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        buf.put_u32(count);
        for (key, value) in &self.entries {
            if key.as_bytes().contains(&0) || value.as_bytes().contains(&0) {
                return Err(ClientError::Encode {
                    reason: format!("option '{}' contains an embedded NUL", key),
                });
            }
            let keylen = u32::try_from(key.len()).map_err(|_| ClientError::Encode {
                reason: format!("option key of {} bytes", key.len()),
            })?;
            let vallen = u32::try_from(value.len() + 1).map_err(|_| ClientError::Encode {
                reason: format!("option '{}' value too large", key),
            })?;
            buf.put_u32(keylen);
            buf.put_u32(vallen);
            buf.extend_from_slice(key.as_bytes());
            buf.put_u8(0);
            buf.extend_from_slice(value.as_bytes());
            buf.put_u8(0);
        }
        Ok(buf.freeze())
    }

    pub fn unserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };
        let count = cursor.u32()?;
        if count > MAX_PAIRS {
            return Err(ClientError::decode(format!("option count {} too large", count)));
        }

        let mut bag = OptionBag::new();
        for _ in 0..count {
            let keylen = cursor.u32()? as usize;
            let vallen = cursor.u32()? as usize;
            let key = cursor.take(keylen)?;
            if cursor.take(1)? != [0u8] {
                return Err(ClientError::decode("option key is not NUL-terminated"));
            }
            let raw = cursor.take(vallen)?;
            let value = match raw.split_last() {
                Some((&0, head)) => head,
                Some(_) => raw,
                None => raw,
            };
            let key = std::str::from_utf8(key)
                .map_err(|e| ClientError::decode(format!("option key: {}", e)))?;
            let value = std::str::from_utf8(value)
                .map_err(|e| ClientError::decode(format!("option '{}' value: {}", key, e)))?;
            bag.set_str(key, value);
        }
        if cursor.pos != data.len() {
            return Err(ClientError::decode(format!(
                "{} trailing bytes after option bag",
                data.len() - cursor.pos
            )));
        }
        Ok(bag)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| ClientError::decode("option bag truncated"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
