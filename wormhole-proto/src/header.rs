use bytes::{Buf, BufMut};

use thiserror::Error;

pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 1;
pub const FIX_VERSION: u8 = 1;

/// Size of the fixed header in front of every frame, in bytes.
pub const HEADER_SIZE: usize = 10;

/// Flag bit reserved for payload compression. Must be zero in this revision.
pub const FLAG_COMPRESSED: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageType(pub u8);

macro_rules! package_types {
    {$($name:ident = $val:expr,)*} => {
        impl PackageType {
            $(pub const $name: PackageType = PackageType($val);)*
        }
    }
}

// All core traffic uses MESSAGE; the other types are reserved on the wire.
package_types! {
    MESSAGE = 0x01,
    STREAM = 0x02,
    USER_DEFINED = 0x04,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

/// The fixed 10-byte header in front of every frame.
///
/// ```text
///  offset  size  field
///  0       4     version      (big-endian: [major, minor, fix, 0])
///  4       1     package_type
///  5       1     flags
///  6       4     payload_len  (big-endian, unsigned)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Composite version: `major << 24 | minor << 16 | fix << 8`.
    pub version: u32,

    pub package_type: PackageType,

    pub flags: u8,

    /// Size of the payload following the header.
    pub payload_len: u32,
}

impl PackageHeader {
    /// Create a header stamped with the current protocol version.
    pub fn new(package_type: PackageType, payload_len: u32) -> Self {
        Self {
            version: make_version(MAJOR_VERSION, MINOR_VERSION, FIX_VERSION),
            package_type,
            flags: 0,
            payload_len,
        }
    }

    /// Break the composite version into `(major, minor, fix)`.
    pub fn version_parts(&self) -> (u8, u8, u8) {
        (
            (self.version >> 24) as u8,
            (self.version >> 16) as u8,
            (self.version >> 8) as u8,
        )
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.version);
        buf.put_u8(self.package_type.0);
        buf.put_u8(self.flags);
        buf.put_u32(self.payload_len);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, HeaderError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(HeaderError::UnexpectedEnd);
        }

        Ok(Self {
            version: buf.get_u32(),
            package_type: PackageType(buf.get_u8()),
            flags: buf.get_u8(),
            payload_len: buf.get_u32(),
        })
    }
}

pub(crate) fn make_version(major: u8, minor: u8, fix: u8) -> u32 {
    (major as u32) << 24 | (minor as u32) << 16 | (fix as u32) << 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exact_bytes() {
        let header = PackageHeader::new(PackageType::MESSAGE, 0x0102);

        let mut buf = Vec::new();
        header.encode(&mut buf);

        // version 1.1.1, type MESSAGE, no flags, payload_len 0x0102
        assert_eq!(buf, b"\x01\x01\x01\x00\x01\x00\x00\x00\x01\x02");
    }

    #[test]
    fn test_roundtrip() {
        let header = PackageHeader::new(PackageType::MESSAGE, 4096);

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = PackageHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(decoded.version_parts(), (1, 1, 1));
    }

    #[test]
    fn test_short_buffer() {
        let header = PackageHeader::new(PackageType::MESSAGE, 0);

        let mut buf = Vec::new();
        header.encode(&mut buf);

        let mut short = &buf[..HEADER_SIZE - 1];
        assert_eq!(
            PackageHeader::decode(&mut short),
            Err(HeaderError::UnexpectedEnd)
        );
    }

    #[test]
    fn test_zero_payload() {
        let header = PackageHeader::new(PackageType::MESSAGE, 0);

        let mut buf = Vec::new();
        header.encode(&mut buf);

        let decoded = PackageHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.payload_len, 0);
    }
}
