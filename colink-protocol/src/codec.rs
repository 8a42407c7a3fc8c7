//! Frame codec.
//!
//! A frame is the 4-byte header followed by a 4-byte little-endian command
//! tag and the payload. The client only depends on the [`FrameCodec`]
//! contract; [`WireCodec`] is the layout spoken by the collaboration server.

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, PayloadType, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub command_tag: u32,
    pub payload_type: PayloadType,
    /// More frames with the same command tag follow.
    pub fragment: bool,
    pub payload: Bytes,
}

/// Serializes a payload into one frame and back.
pub trait FrameCodec: Send + Sync + 'static {
    /// Encodes a single frame. Fails if the result would exceed `max_frame_size`.
    fn encode(
        &self,
        payload: &[u8],
        fragment: bool,
        payload_type: PayloadType,
        command_tag: u32,
        max_frame_size: usize,
    ) -> Result<BytesMut, ProtocolError>;

    /// Decodes one complete frame, header included.
    fn decode(&self, frame: &[u8]) -> Result<DecodedFrame, ProtocolError>;
}

/// Default binary codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl FrameCodec for WireCodec {
    fn encode(
        &self,
        payload: &[u8],
        fragment: bool,
        payload_type: PayloadType,
        command_tag: u32,
        max_frame_size: usize,
    ) -> Result<BytesMut, ProtocolError> {
        let max = max_frame_size.min(MAX_FRAME_SIZE);
        let frame_len = MIN_FRAME_SIZE + payload.len();
        if frame_len > max {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max,
            });
        }

        let header = FrameHeader::new(frame_len, fragment, payload_type)?;
        let mut buf = BytesMut::with_capacity(frame_len);
        buf.put_slice(&header.to_bytes());
        buf.put_u32_le(command_tag);
        buf.put_slice(payload);

        Ok(buf)
    }

    fn decode(&self, frame: &[u8]) -> Result<DecodedFrame, ProtocolError> {
        if frame.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::FrameTooShort {
                len: frame.len(),
                min: MIN_FRAME_SIZE,
            });
        }

        let header = FrameHeader::from_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if header.frame_len() != frame.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.frame_len(),
                actual: frame.len(),
            });
        }

        let payload_type = header.payload_type()?;
        let command_tag = u32::from_le_bytes([
            frame[FRAME_HEADER_SIZE],
            frame[FRAME_HEADER_SIZE + 1],
            frame[FRAME_HEADER_SIZE + 2],
            frame[FRAME_HEADER_SIZE + 3],
        ]);

        Ok(DecodedFrame {
            command_tag,
            payload_type,
            fragment: header.is_fragment(),
            payload: Bytes::copy_from_slice(&frame[MIN_FRAME_SIZE..]),
        })
    }
}

/// Splits a payload into chunks that each fit one frame of `max_frame_size`.
///
/// Yields `(chunk, fragment)` pairs; every chunk but the last carries the
/// fragment flag. An empty payload yields a single empty, final chunk.
pub fn fragments(payload: &[u8], max_frame_size: usize) -> Vec<(&[u8], bool)> {
    let chunk_size = max_frame_size.clamp(MIN_FRAME_SIZE + 1, MAX_FRAME_SIZE) - MIN_FRAME_SIZE;

    if payload.is_empty() {
        return vec![(payload, false)];
    }

    let count = payload.len().div_ceil(chunk_size);
    payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| (chunk, i + 1 < count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let encoded = WireCodec
            .encode(b"{}", false, PayloadType::Json, 0x0102_0304, MAX_FRAME_SIZE)
            .unwrap();

        assert_eq!(encoded.len(), 10);
        let header = FrameHeader::from_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(header.frame_len(), 10);
        assert_eq!(&encoded[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&encoded[8..], b"{}");
    }

    #[test]
    fn test_decode_fields() {
        let encoded = WireCodec
            .encode(b"hello", true, PayloadType::Text, 21, MAX_FRAME_SIZE)
            .unwrap();
        let decoded = WireCodec.decode(&encoded).unwrap();

        assert_eq!(decoded.command_tag, 21);
        assert_eq!(decoded.payload_type, PayloadType::Text);
        assert!(decoded.fragment);
        assert_eq!(decoded.payload.as_ref(), b"hello");
    }

    #[test]
    fn test_empty_payload() {
        let encoded = WireCodec
            .encode(b"", false, PayloadType::Binary, 4, MAX_FRAME_SIZE)
            .unwrap();
        assert_eq!(encoded.len(), MIN_FRAME_SIZE);

        let decoded = WireCodec.decode(&encoded).unwrap();
        assert_eq!(decoded.command_tag, 4);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_encode_respects_max_frame_size() {
        let payload = vec![0u8; 100];
        let result = WireCodec.encode(&payload, false, PayloadType::Binary, 1, 64);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size: 108, max: 64 })
        ));

        // The 13-bit length field caps any caller-supplied limit.
        let payload = vec![0u8; MAX_FRAME_SIZE];
        let result = WireCodec.encode(&payload, false, PayloadType::Binary, 1, 65536);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { max: 8191, .. })));
    }

    #[test]
    fn test_decode_short_frame() {
        let result = WireCodec.decode(&[0x70, 0, 0, 0, 1, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::FrameTooShort { len: 7, .. })));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut encoded = WireCodec
            .encode(b"abc", false, PayloadType::Text, 1, MAX_FRAME_SIZE)
            .unwrap();
        encoded.put_u8(0);

        let result = WireCodec.decode(&encoded);
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared: 11,
                actual: 12
            })
        ));
    }

    #[test]
    fn test_fragments_split() {
        let payload = vec![7u8; 25];
        let parts = fragments(&payload, 18);

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0.len(), 10);
        assert!(parts[0].1);
        assert!(parts[1].1);
        assert_eq!(parts[2].0.len(), 5);
        assert!(!parts[2].1);
    }

    #[test]
    fn test_fragments_single_and_empty() {
        let parts = fragments(b"small", MAX_FRAME_SIZE);
        assert_eq!(parts, vec![(&b"small"[..], false)]);

        let parts = fragments(b"", MAX_FRAME_SIZE);
        assert_eq!(parts, vec![(&b""[..], false)]);
    }

    proptest! {
        #[test]
        fn prop_encoded_frames_decode(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            tag in any::<u32>(),
            fragment in any::<bool>(),
        ) {
            let encoded = WireCodec
                .encode(&payload, fragment, PayloadType::Binary, tag, MAX_FRAME_SIZE)
                .unwrap();
            let decoded = WireCodec.decode(&encoded).unwrap();
            prop_assert_eq!(decoded.command_tag, tag);
            prop_assert_eq!(decoded.fragment, fragment);
            prop_assert_eq!(decoded.payload.as_ref(), payload.as_slice());
        }

        #[test]
        fn prop_fragments_reassemble(
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
            max in 9usize..600,
        ) {
            let parts = fragments(&payload, max);
            let joined: Vec<u8> = parts.iter().flat_map(|(c, _)| c.iter().copied()).collect();
            prop_assert_eq!(&joined, &payload);
            prop_assert!(!parts.last().unwrap().1);
            for (chunk, _) in &parts {
                prop_assert!(chunk.len() + MIN_FRAME_SIZE <= max);
            }
        }
    }
}
