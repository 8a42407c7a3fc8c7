//! # colink-protocol
//!
//! Wire protocol for the colink collaboration client.
//!
//! This crate provides:
//! - The 4-byte little-endian frame header and its length field
//! - The frame codec contract and the default binary codec
//! - Command tags and JSON message payloads
//! - Protocol error types

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{fragments, DecodedFrame, FrameCodec, WireCodec};
pub use error::ProtocolError;
pub use frame::{
    FrameHeader, PayloadType, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MIN_FRAME_SIZE,
};
pub use message::{CommandTag, RequestId, ServerMessage};

/// Default port for the collaboration server.
pub const DEFAULT_PORT: u16 = 7443;
