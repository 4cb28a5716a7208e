//! Message framing codec
//!
//! Both roles speak the same length-prefixed frame format over raw USB bulk
//! pipes:
//!
//! ```text
//! [SOH: 0x01][Length: u16 (big-endian)][Payload: Length bytes][EOT: 0x04]
//! ```
//!
//! USB transfers chunk the byte stream arbitrarily: a frame may span several
//! reads, and one read may carry several frames. Decoding is therefore a
//! resumable state machine fed one byte at a time, instantiated once per
//! transport rather than once per read.
//!
//! The framing layer is payload-agnostic; UTF-8 validation happens at the
//! message layer above it.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Start-of-header marker
pub const SOH: u8 = 0x01;

/// End-of-transmission marker
pub const EOT: u8 = 0x04;

/// Largest payload the 16-bit length field can describe
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Effective payload bound shared by both roles (16 KiB)
///
/// The wire format allows up to [`MAX_FRAME_PAYLOAD`] bytes, but both roles
/// agree on this smaller bound so a message accepted by one side is never
/// rejected by the other. Used for the decoder limit and the send-side
/// reject decision.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024;

/// Encode a payload into a complete frame
///
/// Fails with [`ProtocolError::PayloadTooLarge`] above 65535 bytes; whether
/// to truncate or reject is the caller's policy decision, not the codec's.
///
/// # Example
/// ```
/// use protocol::{encode_frame, EOT, SOH};
///
/// let frame = encode_frame(b"hi").unwrap();
/// assert_eq!(&frame[..], &[SOH, 0x00, 0x02, b'h', b'i', EOT]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let mut frame = BytesMut::with_capacity(payload.len() + 4);
    frame.put_u8(SOH);
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    frame.put_u8(EOT);

    Ok(frame.freeze())
}

/// Decoder states, one per wire position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Discarding bytes until SOH
    WaitStart,
    /// Expecting the high length byte
    ReadLenHi,
    /// Expecting the low length byte
    ReadLenLo,
    /// Accumulating exactly `expected` payload bytes
    ReadData,
    /// Expecting EOT
    WaitEnd,
}

/// Resumable frame decoder
///
/// Holds all parsing state internally so it can be fed across chunk
/// boundaries and across multiple frames in one continuous stream. A framing
/// error discards the partial frame and resets to [`DecodeState::WaitStart`];
/// the decoder stays usable.
///
/// # Example
/// ```
/// use protocol::{encode_frame, FrameDecoder, MAX_PAYLOAD_LEN};
///
/// let mut decoder = FrameDecoder::new(MAX_PAYLOAD_LEN);
/// let frame = encode_frame(b"ping").unwrap();
///
/// let mut decoded = None;
/// for byte in &frame {
///     if let Some(payload) = decoder.push(*byte).unwrap() {
///         decoded = Some(payload);
///     }
/// }
/// assert_eq!(decoded.unwrap().as_ref(), b"ping");
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    max_payload: usize,
    expected: usize,
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder with the given payload bound
    ///
    /// The bound is enforced while evaluating the length bytes, before any
    /// payload buffer is grown, so a hostile declared length never allocates.
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::WaitStart,
            max_payload,
            expected: 0,
            buf: BytesMut::new(),
        }
    }

    /// Discard any partial frame and return to the start state
    ///
    /// Called when the underlying transport is replaced; a new connection
    /// must not inherit parse state from the old byte stream.
    pub fn reset(&mut self) {
        self.state = DecodeState::WaitStart;
        self.expected = 0;
        self.buf.clear();
    }

    /// Whether the decoder is mid-frame
    pub fn is_mid_frame(&self) -> bool {
        self.state != DecodeState::WaitStart
    }

    /// Feed one byte into the state machine
    ///
    /// Returns `Ok(Some(payload))` when this byte completes a frame,
    /// `Ok(None)` when more bytes are needed, and `Err` when the frame is
    /// malformed. On error the partial frame has been discarded and the
    /// decoder has resynchronized to the start state; there is no attempt to
    /// rescan discarded payload bytes for an embedded SOH.
    pub fn push(&mut self, byte: u8) -> Result<Option<Bytes>> {
        match self.state {
            DecodeState::WaitStart => {
                // Anything before SOH is line noise from a torn frame
                if byte == SOH {
                    self.expected = 0;
                    self.state = DecodeState::ReadLenHi;
                }
            }

            DecodeState::ReadLenHi => {
                self.expected = (byte as usize) << 8;
                self.state = DecodeState::ReadLenLo;
            }

            DecodeState::ReadLenLo => {
                self.expected |= byte as usize;
                if self.expected == 0 || self.expected > self.max_payload {
                    let len = self.expected;
                    self.reset();
                    return Err(ProtocolError::InvalidLength {
                        len,
                        max: self.max_payload,
                    });
                }
                self.buf.clear();
                self.buf.reserve(self.expected);
                self.state = DecodeState::ReadData;
            }

            DecodeState::ReadData => {
                self.buf.put_u8(byte);
                if self.buf.len() == self.expected {
                    self.state = DecodeState::WaitEnd;
                }
            }

            DecodeState::WaitEnd => {
                if byte == EOT {
                    let payload = self.buf.split().freeze();
                    self.reset();
                    return Ok(Some(payload));
                }
                // A single unexpected byte here invalidates the whole frame
                self.reset();
                return Err(ProtocolError::UnexpectedTerminator { byte });
            }
        }

        Ok(None)
    }
}
