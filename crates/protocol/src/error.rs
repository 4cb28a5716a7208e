//! Protocol error types

use thiserror::Error;

/// Errors raised by the frame codec
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds what the 16-bit length field can describe
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Zero-length payloads are not representable on the wire
    #[error("empty payload")]
    EmptyPayload,

    /// Declared frame length is zero or exceeds the decoder bound
    #[error("invalid frame length {len} (max: {max})")]
    InvalidLength { len: usize, max: usize },

    /// Byte at the end-of-frame position was not EOT
    #[error("expected EOT terminator, got {byte:#04x}")]
    UnexpectedTerminator { byte: u8 },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PayloadTooLarge {
            size: 70_000,
            max: 65_535,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("payload too large"));
        assert!(msg.contains("70000"));

        let err = ProtocolError::UnexpectedTerminator { byte: 0xFF };
        assert!(format!("{}", err).contains("0xff"));
    }
}
