//! TLV frame encoding/decoding
//!
//! Every unit on the wire is a self-describing frame:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Bytes 0-1:  Tag    (uint16 big-endian)                   │
//! │ Bytes 2-5:  Length (uint32 big-endian)                   │
//! ├──────────────────────────────────────────────────────────┤
//! │ Value: exactly `Length` bytes                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//! Collections, parameter containers and message envelopes nest further
//! frames inside the value of an outer frame.

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Width of the tag field
pub const TAG_SIZE: usize = 2;

/// Width of the length field
pub const LENGTH_SIZE: usize = 4;

/// Frame header size
pub const HEADER_SIZE: usize = TAG_SIZE + LENGTH_SIZE;

/// Largest value the length field can describe
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// Tag codes
pub mod tag {
    pub const INTEGER: u16 = 0x0001;
    pub const DOUBLE: u16 = 0x0002;
    pub const STRING: u16 = 0x0003;
    pub const NULL: u16 = 0x0004;
    pub const LIST: u16 = 0x0010;
    pub const SET: u16 = 0x0011;
    pub const MAP: u16 = 0x0012;
    pub const PUBLIC_KEY: u16 = 0x0020;
    pub const SECRET_KEY: u16 = 0x0021;
    pub const PARAMETER_CONTAINER: u16 = 0x0030;
    pub const REQUEST: u16 = 0x0040;
    pub const RESPONSE: u16 = 0x0041;
    pub const SENSOR_DATA: u16 = 0x0050;
    pub const ASYMMETRIC_CIPHER: u16 = 0x0060;
    pub const SYMMETRIC_CIPHER: u16 = 0x0061;
}

/// A single type-length-value frame.
///
/// The length is never stored: it is always the length of `value`, which
/// is checked against the length field's capacity on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    tag: u16,
    value: Bytes,
}

impl Tlv {
    /// Create a frame, failing if the value cannot be described by the length field
    pub fn new(tag: u16, value: impl Into<Bytes>) -> Result<Self> {
        let value = value.into();
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::PayloadTooLarge(value.len()));
        }
        Ok(Self { tag, value })
    }

    /// Create a frame with an empty value
    pub fn empty(tag: u16) -> Self {
        Self {
            tag,
            value: Bytes::new(),
        }
    }

    /// Create a frame whose value is the concatenation of `children`
    pub fn from_children<'a>(tag: u16, children: impl IntoIterator<Item = &'a Tlv>) -> Result<Self> {
        let mut buf = BytesMut::new();
        for child in children {
            child.encode_into(&mut buf);
        }
        Self::new(tag, buf.freeze())
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Length of the value in bytes
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Total encoded size including the header
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.value.len()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoded frame to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());
        buf.put_u16(self.tag);
        buf.put_u32(self.value.len() as u32);
        buf.extend_from_slice(&self.value);
    }

    /// Decode one frame from the front of `buf`
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                have: buf.remaining(),
            });
        }

        let tag = buf.get_u16();
        let len = buf.get_u32() as usize;

        if buf.remaining() < len {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE + len,
                have: HEADER_SIZE + buf.remaining(),
            });
        }

        let value = buf.copy_to_bytes(len);
        Ok(Self { tag, value })
    }

    /// Check if buffer contains a complete frame, returning its total size
    pub fn check_complete(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        let len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
        let total = HEADER_SIZE + len;

        if buf.len() >= total {
            Some(total)
        } else {
            None
        }
    }

    /// Iterate over the frames packed into this frame's value
    pub fn children(&self) -> Children {
        Children {
            rest: self.value.clone(),
            failed: false,
        }
    }
}

/// Encode `payload` under `tag`
pub fn encode(tag: u16, payload: &[u8]) -> Result<Bytes> {
    let tlv = Tlv::new(tag, Bytes::copy_from_slice(payload))?;
    Ok(tlv.encode())
}

/// Iterator over frames nested in a parent value.
///
/// Yields an error once if the parent value ends mid-frame, then stops.
pub struct Children {
    rest: Bytes,
    failed: bool,
}

impl Iterator for Children {
    type Item = Result<Tlv>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }

        match Tlv::check_complete(&self.rest) {
            Some(total) => {
                let frame = self.rest.split_to(total);
                Some(Tlv::decode(frame))
            }
            None => {
                self.failed = true;
                Some(Err(Error::Decode(format!(
                    "truncated child frame: {} trailing bytes",
                    self.rest.len()
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tlv_encode_decode() {
        let frame = Tlv::new(tag::STRING, &b"hello"[..]).unwrap();
        let encoded = frame.encode();

        assert_eq!(&encoded[..2], &[0x00, 0x03]);
        assert_eq!(&encoded[2..6], &[0, 0, 0, 5]);

        let decoded = Tlv::decode(&encoded[..]).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.len(), 5);
    }

    #[test]
    fn test_check_complete() {
        let frame = Tlv::new(tag::STRING, &b"test"[..]).unwrap();
        let encoded = frame.encode();

        assert_eq!(Tlv::check_complete(&encoded), Some(encoded.len()));
        assert_eq!(Tlv::check_complete(&encoded[..3]), None);
        assert_eq!(Tlv::check_complete(&encoded[..7]), None);
    }

    #[test]
    fn test_children() {
        let a = Tlv::new(tag::INTEGER, &[0, 0, 0, 1][..]).unwrap();
        let b = Tlv::empty(tag::NULL);
        let parent = Tlv::from_children(tag::LIST, [&a, &b]).unwrap();

        let children: Vec<Tlv> = parent.children().collect::<Result<_>>().unwrap();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn test_truncated_children() {
        let parent = Tlv::new(tag::LIST, &[0x00, 0x01, 0x00][..]).unwrap();
        let mut children = parent.children();
        assert!(children.next().unwrap().is_err());
        assert!(children.next().is_none());
    }
}
