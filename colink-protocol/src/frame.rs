//! Frame header layout.
//!
//! Every frame starts with a 4-byte little-endian header:
//!
//! ```text
//!  31            17 16                 4 3         1  0
//! +----------------+--------------------+-----------+----+
//! |    reserved    |  frame length (13) | pay. type |frag|
//! +----------------+--------------------+-----------+----+
//! ```
//!
//! The length field covers the whole frame, header included, so the
//! largest possible frame is 8191 bytes. Anything below [`MIN_FRAME_SIZE`]
//! cannot hold a command tag and is treated as noise by readers.

use crate::error::ProtocolError;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Smallest valid frame: header plus a 4-byte command tag.
pub const MIN_FRAME_SIZE: usize = 8;

/// Largest frame representable by the 13-bit length field.
pub const MAX_FRAME_SIZE: usize = LENGTH_MASK as usize;

const FRAGMENT_BIT: u32 = 1 << 0;
const PAYLOAD_TYPE_SHIFT: u32 = 1;
const PAYLOAD_TYPE_MASK: u32 = 0x7;
const LENGTH_SHIFT: u32 = 4;
const LENGTH_MASK: u32 = 0x1FFF;

/// Encoding of the frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadType {
    /// Opaque bytes.
    Binary,
    /// UTF-8 JSON document.
    #[default]
    Json,
    /// UTF-8 text.
    Text,
}

impl PayloadType {
    pub fn bits(&self) -> u8 {
        match self {
            PayloadType::Binary => 0,
            PayloadType::Json => 1,
            PayloadType::Text => 2,
        }
    }

    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        match bits {
            0 => Ok(PayloadType::Binary),
            1 => Ok(PayloadType::Json),
            2 => Ok(PayloadType::Text),
            other => Err(ProtocolError::InvalidPayloadType(other)),
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader(u32);

impl FrameHeader {
    /// Builds a header for a frame of `frame_len` total bytes.
    pub fn new(
        frame_len: usize,
        fragment: bool,
        payload_type: PayloadType,
    ) -> Result<Self, ProtocolError> {
        if frame_len < MIN_FRAME_SIZE {
            return Err(ProtocolError::FrameTooShort {
                len: frame_len,
                min: MIN_FRAME_SIZE,
            });
        }
        if frame_len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut bits = (frame_len as u32) << LENGTH_SHIFT;
        bits |= (payload_type.bits() as u32 & PAYLOAD_TYPE_MASK) << PAYLOAD_TYPE_SHIFT;
        if fragment {
            bits |= FRAGMENT_BIT;
        }
        Ok(Self(bits))
    }

    pub fn from_bytes(bytes: [u8; FRAME_HEADER_SIZE]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        self.0.to_le_bytes()
    }

    /// Total frame length declared by the header, header included.
    pub fn frame_len(&self) -> usize {
        ((self.0 >> LENGTH_SHIFT) & LENGTH_MASK) as usize
    }

    pub fn is_fragment(&self) -> bool {
        self.0 & FRAGMENT_BIT != 0
    }

    pub fn payload_type_bits(&self) -> u8 {
        ((self.0 >> PAYLOAD_TYPE_SHIFT) & PAYLOAD_TYPE_MASK) as u8
    }

    pub fn payload_type(&self) -> Result<PayloadType, ProtocolError> {
        PayloadType::from_bits(self.payload_type_bits())
    }

    /// Returns whether the declared length can hold a command tag.
    pub fn is_plausible(&self) -> bool {
        self.frame_len() >= MIN_FRAME_SIZE
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::new(42, true, PayloadType::Text).unwrap();
        assert_eq!(header.bits(), (42 << 4) | (2 << 1) | 1);
        assert_eq!(header.frame_len(), 42);
        assert!(header.is_fragment());
        assert_eq!(header.payload_type().unwrap(), PayloadType::Text);
    }

    #[test]
    fn test_header_is_little_endian() {
        let header = FrameHeader::new(8, false, PayloadType::Binary).unwrap();
        assert_eq!(header.to_bytes(), [0x80, 0x00, 0x00, 0x00]);
        assert_eq!(FrameHeader::from_bytes([0x80, 0, 0, 0]).frame_len(), 8);
    }

    #[test]
    fn test_reserved_bits_ignored() {
        let raw = 0xFFFE_0000u32 | (100 << 4) | (1 << 1);
        let header = FrameHeader::from_bytes(raw.to_le_bytes());
        assert_eq!(header.frame_len(), 100);
        assert!(!header.is_fragment());
        assert_eq!(header.payload_type().unwrap(), PayloadType::Json);
    }

    #[test]
    fn test_max_frame_size() {
        assert_eq!(MAX_FRAME_SIZE, 8191);
        let header = FrameHeader::new(MAX_FRAME_SIZE, false, PayloadType::Json).unwrap();
        assert_eq!(header.frame_len(), 8191);

        let result = FrameHeader::new(MAX_FRAME_SIZE + 1, false, PayloadType::Json);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_too_short_rejected() {
        let result = FrameHeader::new(7, false, PayloadType::Json);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooShort { len: 7, min: 8 })
        ));
    }

    #[test]
    fn test_plausibility() {
        assert!(!FrameHeader::from_bytes(((4u32) << 4).to_le_bytes()).is_plausible());
        assert!(!FrameHeader::from_bytes([0, 0, 0, 0]).is_plausible());
        assert!(FrameHeader::from_bytes(((8u32) << 4).to_le_bytes()).is_plausible());
    }

    #[test]
    fn test_invalid_payload_type() {
        let header = FrameHeader::from_bytes(((16u32 << 4) | (7 << 1)).to_le_bytes());
        assert!(matches!(
            header.payload_type(),
            Err(ProtocolError::InvalidPayloadType(7))
        ));
    }
}
