//! Argument and result codecs for the handshake and dump procedures.
//!
//! Requests are built locally and encoded to `Bytes`. Replies are decoded
//! from the transport's [`ForeignBuf`]; opaque payloads stay views into it.

use bytes::Bytes;

use crate::buffer::ForeignBuf;
use crate::error::{ClientError, Result};
use crate::program::{ProgDetail, DUMP_PROTOCOL_TAG};
use crate::xdr::{XdrDecoder, XdrEncoder};

/// DUMP arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRequest {
    pub gfs_id: u64,
}

impl Default for DumpRequest {
    fn default() -> Self {
        Self {
            gfs_id: DUMP_PROTOCOL_TAG,
        }
    }
}

impl DumpRequest {
    pub fn encode(&self) -> Bytes {
        let mut enc = XdrEncoder::new();
        enc.encode_u64(self.gfs_id);
        enc.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = XdrDecoder::new(data);
        Ok(Self {
            gfs_id: dec.decode_u64()?,
        })
    }
}

/// DUMP results: the server's advertised programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReply {
    pub gfs_id: u64,
    pub op_ret: i32,
    pub op_errno: i32,
    pub programs: Vec<ProgDetail>,
}

impl DumpReply {
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = XdrEncoder::new();
        enc.encode_u64(self.gfs_id);
        enc.encode_i32(self.op_ret);
        enc.encode_i32(self.op_errno);
        for prog in &self.programs {
            enc.encode_bool(true);
            enc.encode_string(&prog.name)?;
            enc.encode_u64(prog.prognum);
            enc.encode_u64(prog.progver);
        }
        enc.encode_bool(false);
        Ok(enc.finish())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = XdrDecoder::new(data);
        let gfs_id = dec.decode_u64()?;
        let op_ret = dec.decode_i32()?;
        let op_errno = dec.decode_i32()?;
        let mut programs = Vec::new();
        while dec.decode_bool()? {
            // Each entry is at least 4 + 8 + 8 bytes; reject counts the
            // buffer cannot hold before allocating for them.
            if dec.remaining() < 20 {
                return Err(ClientError::decode("truncated program list"));
            }
            let name = dec.decode_string()?;
            let prognum = dec.decode_u64()?;
            let progver = dec.decode_u64()?;
            programs.push(ProgDetail {
                name,
                prognum,
                progver,
            });
        }
        Ok(Self {
            gfs_id,
            op_ret,
            op_errno,
            programs,
        })
    }
}

/// SETVOLUME arguments: a serialized option bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetVolumeRequest {
    pub dict: Bytes,
}

impl SetVolumeRequest {
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = XdrEncoder::new();
        enc.encode_opaque_variable(&self.dict)?;
        Ok(enc.finish())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = XdrDecoder::new(data);
        Ok(Self {
            dict: Bytes::from(dec.decode_opaque_variable()?),
        })
    }
}

/// SETVOLUME results.
#[derive(Debug, Clone)]
pub struct SetVolumeReply {
    pub op_ret: i32,
    pub op_errno: i32,
    /// Serialized option bag, a view into the reply buffer.
    pub dict: ForeignBuf,
}

impl SetVolumeReply {
    pub fn encode(op_ret: i32, op_errno: i32, dict: &[u8]) -> Result<Bytes> {
        let mut enc = XdrEncoder::new();
        enc.encode_i32(op_ret);
        enc.encode_i32(op_errno);
        enc.encode_opaque_variable(dict)?;
        Ok(enc.finish())
    }

    pub fn decode(buf: &ForeignBuf) -> Result<Self> {
        let mut dec = XdrDecoder::new(buf);
        let op_ret = dec.decode_i32()?;
        let op_errno = dec.decode_i32()?;
        let range = dec.decode_opaque_range()?;
        let dict = buf
            .slice(range)
            .ok_or_else(|| ClientError::decode("dict outside reply buffer"))?;
        Ok(Self {
            op_ret,
            op_errno,
            dict,
        })
    }
}

/// GETSPEC arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSpecRequest {
    pub flags: u32,
    pub key: String,
}

impl GetSpecRequest {
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = XdrEncoder::new();
        enc.encode_u32(self.flags);
        enc.encode_string(&self.key)?;
        Ok(enc.finish())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = XdrDecoder::new(data);
        let flags = dec.decode_u32()?;
        let key = dec.decode_string()?;
        Ok(Self { flags, key })
    }
}

/// GETSPEC results.
#[derive(Debug, Clone)]
pub struct GetSpecReply {
    pub op_ret: i32,
    pub op_errno: i32,
    /// Volume specification, a view into the reply buffer.
    pub spec: ForeignBuf,
}

impl GetSpecReply {
    pub fn encode(op_ret: i32, op_errno: i32, spec: &[u8]) -> Result<Bytes> {
        let mut enc = XdrEncoder::new();
        enc.encode_i32(op_ret);
        enc.encode_i32(op_errno);
        enc.encode_opaque_variable(spec)?;
        Ok(enc.finish())
    }

    pub fn decode(buf: &ForeignBuf) -> Result<Self> {
        let mut dec = XdrDecoder::new(buf);
        let op_ret = dec.decode_i32()?;
        let op_errno = dec.decode_i32()?;
        let range = dec.decode_opaque_range()?;
        let spec = buf
            .slice(range)
            .ok_or_else(|| ClientError::decode("spec outside reply buffer"))?;
        Ok(Self {
            op_ret,
            op_errno,
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CountingRelease;

    #[test]
    fn test_dump_request_carries_tag() {
        let bytes = DumpRequest::default().encode();
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 0, 0, 0xba, 0xbe]);
        assert_eq!(DumpRequest::decode(&bytes).unwrap().gfs_id, 0xbabe);
    }

    #[test]
    fn test_dump_reply_program_list() {
        let reply = DumpReply {
            gfs_id: 0xbabe,
            op_ret: 0,
            op_errno: 0,
            programs: vec![
                ProgDetail::new("GlusterFS Handshake", 14398633, 1),
                ProgDetail::new("data", 330, 1),
            ],
        };
        let decoded = DumpReply::decode(&reply.encode().unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_dump_reply_empty_list_terminator() {
        let reply = DumpReply {
            gfs_id: 1,
            op_ret: -1,
            op_errno: libc::ENOTSUP,
            programs: vec![],
        };
        let bytes = reply.encode().unwrap();
        assert_eq!(bytes.len(), 8 + 4 + 4 + 4);
        assert!(DumpReply::decode(&bytes).unwrap().programs.is_empty());
    }

    #[test]
    fn test_dump_reply_missing_terminator_fails() {
        let reply = DumpReply {
            gfs_id: 1,
            op_ret: 0,
            op_errno: 0,
            programs: vec![ProgDetail::new("data", 330, 1)],
        };
        let bytes = reply.encode().unwrap();
        let result = DumpReply::decode(&bytes[..bytes.len() - 4]);
        assert!(matches!(result, Err(ClientError::Decode { .. })));
    }

    #[test]
    fn test_getspec_reply_is_view_into_reply() {
        let counter = CountingRelease::new();
        let bytes = GetSpecReply::encode(0, 0, b"volume test\nend-volume\n").unwrap();
        let buf = ForeignBuf::new(bytes, counter.clone());

        let reply = GetSpecReply::decode(&buf).unwrap();
        drop(buf);
        assert_eq!(counter.released(), 0, "spec view keeps reply alive");
        assert_eq!(&reply.spec[..], b"volume test\nend-volume\n");
        drop(reply);
        assert_eq!(counter.released(), 1);
    }

    #[test]
    fn test_setvolume_request_wraps_dict() {
        let req = SetVolumeRequest {
            dict: Bytes::from_static(b"\0\0\0\0"),
        };
        let decoded = SetVolumeRequest::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_getspec_request_fields() {
        let req = GetSpecRequest {
            flags: 3,
            key: "testvol".to_string(),
        };
        assert_eq!(GetSpecRequest::decode(&req.encode().unwrap()).unwrap(), req);
    }

    #[test]
    fn test_setvolume_reply_garbage_fails() {
        let buf = ForeignBuf::unmanaged(Bytes::from_static(b"\x00\x01"));
        assert!(SetVolumeReply::decode(&buf).is_err());
    }
}
