//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes (min {min})")]
    FrameTooShort { len: usize, min: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame length mismatch: header declares {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("invalid payload type: {0:#x}")]
    InvalidPayloadType(u8),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooShort { len: 5, min: 8 };
        assert!(err.to_string().contains("5"));

        let err = ProtocolError::FrameTooLarge {
            size: 9000,
            max: 8191,
        };
        let msg = err.to_string();
        assert!(msg.contains("9000"));
        assert!(msg.contains("8191"));

        let err = ProtocolError::LengthMismatch {
            declared: 20,
            actual: 12,
        };
        assert!(err.to_string().contains("20"));

        let err = ProtocolError::InvalidPayloadType(0x7);
        assert!(err.to_string().contains("0x7"));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));

        let err = ProtocolError::MissingField("project_id");
        assert!(err.to_string().contains("project_id"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ProtocolError = json_err.into();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
